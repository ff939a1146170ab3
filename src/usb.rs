// Based on USB 2.0 specifications
// https://www.usb.org/document-library/usb-20-specification
// especially usb_20.pdf

mod types;

pub mod byte;
pub mod packet;
pub mod signal;

pub use types::{
    crc16, crc5, CrcStatus, DataPid, Fields, HandshakePid, Packet, PacketError, Pid, Speed,
    TokenPid, SYNC,
};
