use anyhow::Result;

use super::types::Speed;
use crate::input::Sample;

/// Differential bus states of the USB physical layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    SE0,
    J,
    K,
    SE1,
}

/// Voltage cutoffs turning an analog channel into a logic level.
#[derive(Debug, Clone, Copy)]
pub struct Levels {
    pub threshold: f64,
    pub hysteresis: f64,
}

impl Default for Levels {
    fn default() -> Self {
        Levels {
            threshold: 1.2,
            hysteresis: 0.,
        }
    }
}

impl Levels {
    /// Samples inside the hysteresis band keep the channel's previous level.
    fn classify(&self, volts: f64, previous: bool) -> bool {
        if volts >= self.threshold + self.hysteresis / 2. {
            true
        } else if volts < self.threshold - self.hysteresis / 2. {
            false
        } else {
            previous
        }
    }
}

/// Examines the idle level ahead of the first activity to tell low- from
/// full-speed polarity: an idle D+ high is a full-speed J, an idle D- high a
/// low-speed one.
///
/// Fails when the capture never leaves a single bus state, there is nothing
/// to decode in it.
pub fn detect_speed(samples: &[Sample], levels: Levels) -> Result<Speed> {
    let mut dp = false;
    let mut dm = false;
    let mut idle_dp = None;
    let mut previous = None;
    let mut active = false;

    for sample in samples {
        dp = levels.classify(sample.dp, dp);
        dm = levels.classify(sample.dm, dm);

        if idle_dp.is_none() && dp != dm {
            idle_dp = Some(dp);
        }
        if let Some(previous) = previous {
            active = active || previous != (dp, dm);
        }
        previous = Some((dp, dm));

        if active {
            if let Some(idle_dp) = idle_dp {
                return Ok(if idle_dp { Speed::Full } else { Speed::Low });
            }
        }
    }
    Err(anyhow::anyhow!("No activity on the bus"))
}

/// Classifies every sample against the thresholds and forwards bus-state
/// changes only, timestamped at the first sample of the new state.
pub struct SignalIterator<T> {
    it: T,
    speed: Speed,
    levels: Levels,
    dp: bool,
    dm: bool,
    current: Option<Signal>,
}

impl<T> Iterator for SignalIterator<T>
where
    T: Iterator<Item = Sample>,
{
    type Item = (f64, Signal);
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let sample = self.it.next()?;
            self.dp = self.levels.classify(sample.dp, self.dp);
            self.dm = self.levels.classify(sample.dm, self.dm);

            let s = match (self.dp, self.dm, self.speed) {
                (true, true, _) => Signal::SE1,
                (false, false, _) => Signal::SE0,
                (true, false, Speed::Full) | (false, true, Speed::Low) => Signal::J,
                (true, false, Speed::Low) | (false, true, Speed::Full) => Signal::K,
            };
            if self.current != Some(s) {
                self.current = Some(s);
                break Some((sample.ts, s));
            }
        }
    }
}

impl<T> SignalIterator<T> {
    pub fn new(input: T, speed: Speed, levels: Levels) -> Self {
        Self {
            it: input,
            speed,
            levels,
            dp: false,
            dm: false,
            current: None,
        }
    }
}

pub trait SignalIteratorExt: Sized {
    fn into_signals(self, speed: Speed, levels: Levels) -> SignalIterator<Self> {
        SignalIterator::new(self, speed, levels)
    }
}
impl<T> SignalIteratorExt for T where T: Iterator<Item = Sample> {}
