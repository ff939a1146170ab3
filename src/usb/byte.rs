use std::collections::VecDeque;

use anyhow::Result;

use super::signal::Signal;
use super::types::Speed;

/// SE0 held this long is a host-driven reset, not an EOP.
const RESET_HOLD: f64 = 0.010;

/// Byte-level events recovered from the bit stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Byte {
    /// Host held SE0 long enough to reset the bus.
    Reset,
    /// First transition out of idle, the packet's start time.
    Sop,
    Byte(u8),
    /// A run of six ones was not followed by a stuffed zero.
    StuffViolation,
    /// End of packet. `dangling` is the number of bits left over when the
    /// packet was not byte aligned.
    Eop { dangling: u8 },
    /// The capture ended while a packet was still in flight.
    Truncated,
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum State {
    Idle,
    Receiving,
    Eop,
}

/// Decodes NRZI over runs of bus states and reassembles bytes, LSB first.
///
/// A run of N bit periods in one state is one transition and N-1 held
/// levels: a `0` followed by N-1 `1`s. Each observed transition re-anchors
/// the bit clock, which is all the drift tolerance a packet needs since a
/// stuffed zero bounds every run to seven bits.
pub struct ByteIterator<T> {
    it: T,
    look_ahead: Option<(f64, Signal)>,

    bit_period: f64,

    state: State,
    counter: u16,
    shift_reg: u16,
    consecutive_ones: u8,
    done: bool,

    ev_queue: VecDeque<(f64, Result<Byte>)>,
}

impl<T> ByteIterator<T> {
    pub fn new(input: T, speed: Speed) -> Self {
        Self {
            it: input,
            look_ahead: None,
            bit_period: speed.bit_period(),
            state: State::Idle,
            counter: 0,
            shift_reg: 0,
            consecutive_ones: 0,
            done: false,
            ev_queue: VecDeque::new(),
        }
    }

    fn push_bits(&mut self, ulen: u64) {
        // a run decodes to one transition bit (0) followed by ulen-1 ones
        let ones = (ulen - 1) as u16;
        let bits = if self.consecutive_ones == 6 {
            // the leading zero is the stuffed bit, drop it
            ones
        } else {
            ulen as u16
        };

        self.counter += bits;
        self.shift_reg >>= bits;
        if ones != 0 {
            let mask = (1 << ones) - 1;
            self.shift_reg |= mask << (16 - ones);
        }
        self.consecutive_ones = ones as u8;
    }

    fn reset_shift(&mut self) {
        self.counter = 0;
        self.shift_reg = 0;
        self.consecutive_ones = 0;
    }

    /// Input ran out; a packet in flight is surfaced rather than dropped.
    fn flush(&mut self, ts: f64) {
        self.done = true;
        match self.state {
            State::Receiving => self.ev_queue.push_back((ts, Ok(Byte::Truncated))),
            State::Eop => self.ev_queue.push_back((
                ts - 2. * self.bit_period,
                Ok(Byte::Eop {
                    dangling: self.counter as u8,
                }),
            )),
            State::Idle => {}
        }
        self.state = State::Idle;
    }
}

impl<T> Iterator for ByteIterator<T>
where
    T: Iterator<Item = (f64, Signal)>,
{
    type Item = (f64, Result<Byte>);
    fn next(&mut self) -> Option<Self::Item> {
        while self.ev_queue.is_empty() {
            if self.done {
                return None;
            }

            let mut current = match self.look_ahead.take() {
                Some(current) => current,
                None => match self.it.next() {
                    Some(current) => current,
                    None => {
                        self.done = true;
                        continue;
                    }
                },
            };
            let mut next = match self.it.next() {
                Some(next) => next,
                None => {
                    self.flush(current.0);
                    continue;
                }
            };

            // probe skew between the channels shows up as spurious SE0/SE1
            // wedged between two opposite differential states
            let mut spurious = 0.;
            if (current.1 == Signal::SE0 || current.1 == Signal::SE1)
                && (next.0 - current.0) <= self.bit_period / 2.
            {
                spurious = next.0 - current.0;
                current = next;
                next = match self.it.next() {
                    Some(next) => next,
                    None => {
                        self.flush(current.0);
                        continue;
                    }
                };
            }
            self.look_ahead = Some(next);

            let (ts, sig) = current;
            let len = next.0 - ts;
            let ulen = ((len + spurious) / self.bit_period).round() as u64;
            let nts = next.0;
            if ulen == 0 {
                // sub-bit chatter on a single channel
                continue;
            }

            if sig == Signal::SE1 {
                self.ev_queue
                    .push_back((ts, Err(anyhow::anyhow!("SE1 state on the bus"))));
                self.reset_shift();
                self.state = State::Idle;
            } else if sig == Signal::SE0 && len >= RESET_HOLD {
                self.ev_queue.push_back((ts, Ok(Byte::Reset)));
                self.reset_shift();
                self.state = State::Idle;
            } else {
                match self.state {
                    State::Idle => match sig {
                        Signal::K => {
                            if ulen <= 7 {
                                self.reset_shift();
                                self.state = State::Receiving;
                                self.ev_queue.push_back((ts, Ok(Byte::Sop)));
                                self.push_bits(ulen);
                            } else {
                                self.ev_queue.push_back((
                                    ts,
                                    Err(anyhow::anyhow!(
                                        "K state held too long for a packet start"
                                    )),
                                ));
                            }
                        }
                        // keep-alive EOPs show up as bare SE0 runs
                        Signal::J | Signal::SE0 => {}
                        Signal::SE1 => unreachable!(),
                    },
                    State::Receiving => match sig {
                        Signal::SE0 if (1..=3).contains(&ulen) => {
                            self.state = State::Eop;
                        }
                        Signal::SE0 => {
                            self.state = State::Idle;
                            self.ev_queue
                                .push_back((ts, Err(anyhow::anyhow!("Framing error"))));
                        }
                        Signal::J | Signal::K if ulen <= 7 => self.push_bits(ulen),
                        Signal::J | Signal::K if ulen <= 9 => {
                            // a missing stuffed zero; keep the first seven
                            // bits and carry on best-effort
                            self.push_bits(7);
                            self.ev_queue.push_back((ts, Ok(Byte::StuffViolation)));
                        }
                        Signal::J | Signal::K => {
                            // the line went quiet without an EOP
                            self.state = State::Idle;
                            self.ev_queue
                                .push_back((ts, Err(anyhow::anyhow!("Framing error"))));
                        }
                        Signal::SE1 => unreachable!(),
                    },
                    State::Eop => {
                        if sig == Signal::J {
                            self.ev_queue.push_back((
                                ts - 2. * self.bit_period,
                                Ok(Byte::Eop {
                                    dangling: self.counter as u8,
                                }),
                            ));
                            self.reset_shift();
                            self.state = State::Idle;
                        } else {
                            self.state = State::Idle;
                            self.ev_queue.push_back((
                                ts,
                                Err(anyhow::anyhow!("Bus did not return to idle after EOP")),
                            ));
                        }
                    }
                }
            }

            if self.counter >= 8 {
                self.ev_queue.push_back((
                    nts,
                    Ok(Byte::Byte(
                        ((self.shift_reg >> (16 - self.counter)) & 0xFF) as u8,
                    )),
                ));
                self.counter -= 8;
            }
        }
        self.ev_queue.pop_front()
    }
}

pub trait ByteIteratorExt: Sized {
    fn into_bytes(self, speed: Speed) -> ByteIterator<Self> {
        ByteIterator::new(self, speed)
    }
}
impl<T> ByteIteratorExt for T where T: Iterator<Item = (f64, Signal)> {}
