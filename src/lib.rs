//! Decodes USB low-/full-speed packets from two-channel analog captures of
//! the D+/D- pair, the kind an oscilloscope (or a logic analyzer, via VCD)
//! produces.

pub mod input;
pub mod report;
pub mod usb;
