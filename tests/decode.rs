//! End-to-end checks over synthetic analog captures: known byte sequences
//! are NRZI-encoded, stuffed and sampled at 10 samples per bit, then fed
//! through the whole decoding chain.

use usb_scope_parser::input::Sample;
use usb_scope_parser::usb::byte::ByteIteratorExt;
use usb_scope_parser::usb::packet::{Event, PacketIteratorExt};
use usb_scope_parser::usb::signal::{detect_speed, Levels, SignalIteratorExt};
use usb_scope_parser::usb::{
    crc16, crc5, CrcStatus, DataPid, Fields, HandshakePid, Packet, PacketError, Pid, Speed,
    TokenPid,
};

const SAMPLES_PER_BIT: usize = 10;

struct Encoder {
    speed: Speed,
    ts: f64,
    level: bool, // true = J
    ones: u32,
    samples: Vec<Sample>,
}

impl Encoder {
    fn new(speed: Speed) -> Self {
        let mut enc = Encoder {
            speed,
            ts: 0.,
            level: true,
            ones: 0,
            samples: Vec::new(),
        };
        enc.idle(8);
        enc
    }

    fn push_state(&mut self, dp: f64, dm: f64, bits: f64) {
        let dt = self.speed.bit_period() / SAMPLES_PER_BIT as f64;
        let n = (bits * SAMPLES_PER_BIT as f64).round() as usize;
        for _ in 0..n {
            self.samples.push(Sample {
                ts: self.ts,
                dp,
                dm,
            });
            self.ts += dt;
        }
    }

    fn push_level(&mut self, j: bool, bits: f64) {
        let (dp, dm) = match (j, self.speed) {
            (true, Speed::Full) | (false, Speed::Low) => (3.3, 0.),
            (false, Speed::Full) | (true, Speed::Low) => (0., 3.3),
        };
        self.push_state(dp, dm, bits);
    }

    fn idle(&mut self, bits: u32) {
        self.level = true;
        self.ones = 0;
        self.push_level(true, f64::from(bits));
    }

    fn bit(&mut self, bit: bool) {
        if bit {
            self.ones += 1;
        } else {
            self.level = !self.level;
            self.ones = 0;
        }
        self.push_level(self.level, 1.);
        if self.ones == 6 {
            // stuffed zero
            self.level = !self.level;
            self.ones = 0;
            self.push_level(self.level, 1.);
        }
    }

    fn byte(&mut self, byte: u8) {
        for i in 0..8 {
            self.bit(byte >> i & 1 != 0);
        }
    }

    fn eop(&mut self) {
        self.push_state(0., 0., 2.);
        self.level = true;
        self.ones = 0;
        self.push_level(true, 1.);
    }

    fn se0_hold(&mut self, seconds: f64) {
        let dt = seconds / 20.;
        for _ in 0..20 {
            self.samples.push(Sample {
                ts: self.ts,
                dp: 0.,
                dm: 0.,
            });
            self.ts += dt;
        }
    }

    fn packet(&mut self, bytes: &[u8]) {
        self.ones = 0;
        self.byte(0x80); // sync
        for &b in bytes {
            self.byte(b);
        }
        self.eop();
        self.idle(4);
    }

    fn finish(mut self) -> Vec<Sample> {
        let level = self.level;
        self.push_level(level, 4.);
        self.samples
    }
}

fn token(pid: u8, address: u8, endpoint: u8) -> Vec<u8> {
    let raw = u16::from(address & 0x7F) | u16::from(endpoint & 0x0F) << 7;
    let crc = crc5(u32::from(raw), 11);
    vec![pid, raw as u8, (raw >> 8) as u8 | crc << 3]
}

fn data(pid: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![pid];
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&crc16(payload).to_le_bytes());
    bytes
}

fn decode(samples: &[Sample], speed: Speed) -> Vec<(f64, anyhow::Result<Event>)> {
    samples
        .iter()
        .copied()
        .into_signals(speed, Levels::default())
        .into_bytes(speed)
        .into_packets()
        .collect()
}

fn packets(events: &[(f64, anyhow::Result<Event>)]) -> Vec<&Packet> {
    events
        .iter()
        .filter_map(|(_, ev)| match ev {
            Ok(Event::Packet(packet)) => Some(packet),
            _ => None,
        })
        .collect()
}

#[test]
fn setup_data0_ack_round_trip() {
    let mut enc = Encoder::new(Speed::Full);
    enc.packet(&token(0x2D, 10, 0));
    enc.packet(&data(0xC3, &[0x00, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]));
    enc.packet(&[0xD2]);
    let samples = enc.finish();

    assert_eq!(detect_speed(&samples, Levels::default()).unwrap(), Speed::Full);

    let events = decode(&samples, Speed::Full);
    let out = packets(&events);
    assert_eq!(out.len(), 3);

    assert_eq!(out[0].pid, Some(Pid::Token(TokenPid::Setup)));
    assert!(out[0].errors.is_empty());
    match &out[0].fields {
        Fields::Token {
            address,
            endpoint,
            crc5,
            crc5_status,
        } => {
            assert_eq!((*address, *endpoint), (10, 0));
            assert_eq!(*crc5, 0x1B);
            assert_eq!(*crc5_status, CrcStatus::Ok);
        }
        fields => panic!("not a token: {:?}", fields),
    }

    assert_eq!(out[1].pid, Some(Pid::Data(DataPid::Data0)));
    assert!(out[1].errors.is_empty());
    match &out[1].fields {
        Fields::Data {
            payload,
            crc16_status,
            ..
        } => {
            assert_eq!(payload, &[0x00, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
            assert_eq!(*crc16_status, CrcStatus::Ok);
        }
        fields => panic!("not a data packet: {:?}", fields),
    }

    assert_eq!(out[2].pid, Some(Pid::Handshake(HandshakePid::Ack)));
    assert_eq!(out[2].fields, Fields::Handshake);
    assert!(out[2].errors.is_empty());

    // capture order is preserved
    assert!(out[0].ts < out[1].ts && out[1].ts < out[2].ts);
}

#[test]
fn low_speed_round_trip() {
    let mut enc = Encoder::new(Speed::Low);
    enc.packet(&token(0x69, 3, 1));
    enc.packet(&[0x5A]);
    let samples = enc.finish();

    assert_eq!(detect_speed(&samples, Levels::default()).unwrap(), Speed::Low);

    let events = decode(&samples, Speed::Low);
    let out = packets(&events);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].pid, Some(Pid::Token(TokenPid::In)));
    match &out[0].fields {
        Fields::Token {
            address,
            endpoint,
            crc5_status,
            ..
        } => {
            assert_eq!((*address, *endpoint), (3, 1));
            assert_eq!(*crc5_status, CrcStatus::Ok);
        }
        fields => panic!("not a token: {:?}", fields),
    }
    assert_eq!(out[1].pid, Some(Pid::Handshake(HandshakePid::Nak)));
}

#[test]
fn corrupt_crc5_is_reported_and_decoding_goes_on() {
    let mut enc = Encoder::new(Speed::Full);
    // setup token to address 10 with one bit flipped in the crc field
    enc.packet(&[0x2D, 0x0A, 0xD8 ^ 0x08]);
    enc.packet(&[0xD2]);
    let samples = enc.finish();

    let events = decode(&samples, Speed::Full);
    let out = packets(&events);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].crc_status(), CrcStatus::Fail);
    match &out[0].fields {
        Fields::Token { address, .. } => assert_eq!(*address, 10),
        fields => panic!("not a token: {:?}", fields),
    }
    assert_eq!(out[1].pid, Some(Pid::Handshake(HandshakePid::Ack)));
    assert!(out[1].errors.is_empty());
}

#[test]
fn payload_full_of_ones_round_trips_through_stuffing() {
    let payload = [0xFF, 0xFF, 0x3F, 0x07, 0xFF];
    let mut enc = Encoder::new(Speed::Full);
    enc.packet(&data(0x4B, &payload));
    let samples = enc.finish();

    let events = decode(&samples, Speed::Full);
    let out = packets(&events);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].pid, Some(Pid::Data(DataPid::Data1)));
    assert!(out[0].errors.is_empty());
    match &out[0].fields {
        Fields::Data {
            payload: decoded,
            crc16_status,
            ..
        } => {
            assert_eq!(decoded, &payload);
            assert_eq!(*crc16_status, CrcStatus::Ok);
        }
        fields => panic!("not a data packet: {:?}", fields),
    }
}

#[test]
fn sof_carries_the_frame_number() {
    let mut enc = Encoder::new(Speed::Full);
    enc.packet(&[0xA5, 0xB7, 0xE2]);
    let samples = enc.finish();

    let out_events = decode(&samples, Speed::Full);
    let out = packets(&out_events);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].pid, Some(Pid::Sof));
    match &out[0].fields {
        Fields::Sof {
            frame, crc5_status, ..
        } => {
            assert_eq!(*frame, 0x2B7);
            assert_eq!(*crc5_status, CrcStatus::Ok);
        }
        fields => panic!("not a sof: {:?}", fields),
    }
}

#[test]
fn idle_only_capture_aborts_with_no_activity() {
    let samples = Encoder::new(Speed::Full).finish();
    assert!(detect_speed(&samples, Levels::default()).is_err());
    // forcing the speed still decodes nothing out of a silent line
    assert!(packets(&decode(&samples, Speed::Full)).is_empty());
}

#[test]
fn missing_eop_surfaces_a_truncated_packet() {
    let mut enc = Encoder::new(Speed::Full);
    enc.ones = 0;
    enc.byte(0x80);
    enc.byte(0xC3);
    enc.byte(0x55);
    let samples = enc.finish();

    let events = decode(&samples, Speed::Full);
    let out = packets(&events);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].pid, Some(Pid::Data(DataPid::Data0)));
    assert!(out[0].errors.contains(&PacketError::Truncated));
}

#[test]
fn keep_alive_eops_decode_to_nothing() {
    let mut enc = Encoder::new(Speed::Low);
    enc.eop();
    enc.idle(6);
    enc.eop();
    enc.idle(6);
    let samples = enc.finish();

    let events = decode(&samples, Speed::Low);
    assert!(packets(&events).is_empty());
    assert!(events.iter().all(|(_, ev)| ev.is_ok()));
}

#[test]
fn long_se0_reports_a_bus_reset() {
    let mut enc = Encoder::new(Speed::Full);
    enc.se0_hold(0.012);
    enc.idle(8);
    enc.packet(&[0xD2]);
    let samples = enc.finish();

    let events = decode(&samples, Speed::Full);
    assert!(events
        .iter()
        .any(|(_, ev)| matches!(ev, Ok(Event::Reset))));
    let out = packets(&events);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].pid, Some(Pid::Handshake(HandshakePid::Ack)));
}

#[test]
fn explicit_speed_agrees_with_detection() {
    let mut enc = Encoder::new(Speed::Full);
    enc.packet(&[0xD2]);
    let samples = enc.finish();

    let detected = detect_speed(&samples, Levels::default()).unwrap();
    assert_eq!(detected, Speed::Full);

    // decoding with the detected speed and with the matching override is
    // the same thing
    let auto = decode(&samples, detected);
    let forced = decode(&samples, Speed::Full);
    assert_eq!(packets(&auto), packets(&forced));
}
