use anyhow::Result;

use super::byte::Byte;
use super::types::{crc16, crc5, CrcStatus, Fields, Packet, PacketError, Pid, SYNC};

/// Bus-level events surfaced to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Host-driven bus reset.
    Reset,
    Packet(Packet),
}

/// Collects byte-level events into framed packets and decodes PID, fields
/// and checksums.
///
/// Every framed packet is surfaced, flags and all; only byte-level
/// structural errors (SE1, framing) abandon the burst in flight.
pub struct PacketIterator<T> {
    it: T,
    start: f64,
    buf: Vec<u8>,
    stuffing: bool,
}

impl<T> Iterator for PacketIterator<T>
where
    T: Iterator<Item = (f64, Result<Byte>)>,
{
    type Item = (f64, Result<Event>);
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (ts, byte) = match self.it.next()? {
                (ts, Ok(byte)) => (ts, byte),
                (ts, Err(e)) => {
                    self.discard();
                    return Some((ts, Err(e)));
                }
            };
            match byte {
                Byte::Reset => {
                    self.discard();
                    return Some((ts, Ok(Event::Reset)));
                }
                Byte::Sop => {
                    self.discard();
                    self.start = ts;
                }
                Byte::Byte(b) => self.buf.push(b),
                Byte::StuffViolation => self.stuffing = true,
                Byte::Eop { dangling } => {
                    let packet = self.assemble(dangling, false);
                    return Some((packet.ts, Ok(Event::Packet(packet))));
                }
                Byte::Truncated => {
                    let packet = self.assemble(0, true);
                    return Some((packet.ts, Ok(Event::Packet(packet))));
                }
            }
        }
    }
}

impl<T> PacketIterator<T> {
    pub fn new(input: T) -> Self {
        Self {
            it: input,
            start: 0.,
            buf: Vec::new(),
            stuffing: false,
        }
    }

    fn discard(&mut self) {
        self.buf.clear();
        self.stuffing = false;
    }

    fn assemble(&mut self, dangling: u8, truncated: bool) -> Packet {
        let bytes = std::mem::replace(&mut self.buf, Vec::new());

        let mut errors = Vec::new();
        if self.stuffing {
            self.stuffing = false;
            errors.push(PacketError::BitStuffing);
        }
        if truncated {
            errors.push(PacketError::Truncated);
        }
        if dangling != 0 {
            errors.push(PacketError::Alignment(dangling));
        }

        let (pid, fields) = decode_fields(&bytes, &mut errors);
        Packet {
            ts: self.start,
            pid,
            fields,
            errors,
            bytes,
        }
    }
}

fn flag(errors: &mut Vec<PacketError>, error: PacketError) {
    if !errors.contains(&error) {
        errors.push(error);
    }
}

fn decode_fields(bytes: &[u8], errors: &mut Vec<PacketError>) -> (Option<Pid>, Fields) {
    match bytes.first() {
        None => {
            flag(errors, PacketError::Truncated);
            return (None, Fields::None);
        }
        // alignment is unknown without SYNC, no point decoding further
        Some(&b) if b != SYNC => {
            flag(errors, PacketError::Sync(b));
            return (None, Fields::None);
        }
        Some(_) => {}
    }

    let pid_byte = match bytes.get(1) {
        Some(&b) => b,
        None => {
            flag(errors, PacketError::Truncated);
            return (None, Fields::None);
        }
    };
    let value = pid_byte & 0x0F;
    if value != !pid_byte >> 4 {
        flag(errors, PacketError::PidCheck);
    }
    let pid = match Pid::from_nibble(value) {
        Some(pid) => pid,
        None => {
            flag(errors, PacketError::UnknownPid(value));
            return (None, Fields::None);
        }
    };

    let body = &bytes[2..];
    let fields = match pid {
        Pid::Token(_) | Pid::Sof => {
            if body.len() != 2 {
                flag(errors, PacketError::Length);
                Fields::None
            } else {
                // 11 field bits, LSB first, then 5 bits of CRC
                let raw = u16::from(body[0]) | u16::from(body[1] & 0x07) << 8;
                let received = body[1] >> 3;
                let status = if crc5(u32::from(raw), 11) == received {
                    CrcStatus::Ok
                } else {
                    CrcStatus::Fail
                };
                if pid == Pid::Sof {
                    Fields::Sof {
                        frame: raw,
                        crc5: received,
                        crc5_status: status,
                    }
                } else {
                    Fields::Token {
                        address: body[0] & 0x7F,
                        endpoint: (body[1] & 0x07) << 1 | body[0] >> 7,
                        crc5: received,
                        crc5_status: status,
                    }
                }
            }
        }
        Pid::Data(_) => {
            if body.len() < 2 {
                flag(errors, PacketError::Length);
                Fields::None
            } else {
                let (payload, trailer) = body.split_at(body.len() - 2);
                let received = u16::from_le_bytes([trailer[0], trailer[1]]);
                Fields::Data {
                    payload: payload.to_vec(),
                    crc16: received,
                    crc16_status: if crc16(payload) == received {
                        CrcStatus::Ok
                    } else {
                        CrcStatus::Fail
                    },
                }
            }
        }
        Pid::Handshake(_) | Pid::Pre => {
            if !body.is_empty() {
                flag(errors, PacketError::Length);
            }
            Fields::Handshake
        }
    };
    (Some(pid), fields)
}

pub trait PacketIteratorExt: Sized {
    fn into_packets(self) -> PacketIterator<Self> {
        PacketIterator::new(self)
    }
}
impl<T> PacketIteratorExt for T where T: Iterator<Item = (f64, Result<Byte>)> {}
