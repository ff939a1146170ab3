use colored::Colorize;
use itertools::Itertools;

use crate::usb::packet::Event;
use crate::usb::{CrcStatus, Fields, Packet};

/// Prints one line per decoded event and keeps the tallies for the final
/// summary.
#[derive(Default)]
pub struct Reporter {
    packets: usize,
    errors: usize,
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .format_with(" ", |byte, f| f(&format_args!("{:02x}", byte)))
        .to_string()
}

fn status(crc: CrcStatus) -> String {
    match crc {
        CrcStatus::Ok => "OK".green().to_string(),
        CrcStatus::Fail => "FAIL".red().bold().to_string(),
        CrcStatus::NotApplicable => String::new(),
    }
}

fn render(packet: &Packet) -> String {
    let pid = match packet.pid {
        Some(pid) => pid.name().bold().to_string(),
        None => "???".red().bold().to_string(),
    };
    let fields = match &packet.fields {
        Fields::Token {
            address,
            endpoint,
            crc5,
            crc5_status,
        } => format!(
            "addr {:3} ep {:2} crc5 {:#04x} {}",
            address,
            endpoint,
            crc5,
            status(*crc5_status)
        ),
        Fields::Sof {
            frame,
            crc5,
            crc5_status,
        } => format!(
            "frame {:4} crc5 {:#04x} {}",
            frame,
            crc5,
            status(*crc5_status)
        ),
        Fields::Data {
            payload,
            crc16,
            crc16_status,
        } => format!(
            "{:3} bytes [{}] crc16 {:#06x} {}",
            payload.len(),
            hex(payload),
            crc16,
            status(*crc16_status)
        ),
        Fields::Handshake | Fields::None => String::new(),
    };
    let mut line = format!(
        "[{:12.9}] {:5} {} | {}",
        packet.ts,
        pid,
        fields,
        hex(&packet.bytes)
    );
    if !packet.errors.is_empty() {
        line.push_str(&format!(
            " ({})",
            packet.errors.iter().format(", ").to_string().yellow()
        ));
    }
    line
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&mut self, ts: f64, event: &anyhow::Result<Event>) {
        match event {
            Ok(Event::Reset) => println!("[{:12.9}] {}", ts, "Bus reset".cyan()),
            Ok(Event::Packet(packet)) => {
                self.packets += 1;
                if !packet.is_clean() {
                    self.errors += 1;
                }
                println!("{}", render(packet));
            }
            Err(e) => {
                self.errors += 1;
                println!("[{:12.9}] {} {}", ts, "Warning:".yellow().bold(), e);
            }
        }
    }

    pub fn summary(&self) {
        println!(
            "{} packet(s), {} with errors or warnings",
            self.packets, self.errors
        );
    }
}
