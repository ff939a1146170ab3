use std::io::Read;

use anyhow::{anyhow, Result};
use vcd::{Command, Parser, TimescaleUnit, Value, VarType};

use super::Sample;

// Synthetic levels for digital captures, the digitizer thresholds them
// right back.
const HIGH: f64 = 3.3;
const LOW: f64 = 0.0;

fn volts(level: bool) -> f64 {
    if level {
        HIGH
    } else {
        LOW
    }
}

/// Loads a logic-analyzer VCD dump carrying the two bus wires.
pub fn load<T: Read>(input: T, dp_wire: &str, dm_wire: &str) -> Result<Vec<Sample>> {
    let mut parser = Parser::new(input);
    let mut factor = 1.;
    let mut current_ts = 0.;
    let mut dp_id = None;
    let mut dm_id = None;
    let mut dp = false;
    let mut dm = false;
    let mut samples = Vec::new();

    for command in &mut parser {
        match command? {
            Command::Timescale(n, unit) => {
                let unit = match unit {
                    TimescaleUnit::S => 1.,
                    TimescaleUnit::MS => 0.001,
                    TimescaleUnit::US => 0.000_001,
                    TimescaleUnit::NS => 0.000_000_001,
                    TimescaleUnit::PS => 0.000_000_000_001,
                    TimescaleUnit::FS => 0.000_000_000_000_001,
                };
                factor = f64::from(n) * unit;
            }
            Command::VarDef(ty, _, id, name) => {
                if ty != VarType::Wire {
                    continue;
                }
                if name == dp_wire {
                    dp_id = Some(id);
                } else if name == dm_wire {
                    dm_id = Some(id);
                }
            }
            Command::Timestamp(ts) => {
                let new_ts = ts as f64 * factor;
                anyhow::ensure!(new_ts >= current_ts, "Timestamps must be monotonic");
                current_ts = new_ts;
            }
            Command::ChangeScalar(id, value) => {
                let level = match value {
                    Value::V0 => false,
                    Value::V1 => true,
                    value => return Err(anyhow!("Unsupported value: {:?}", value)),
                };
                if Some(id) == dp_id {
                    dp = level;
                } else if Some(id) == dm_id {
                    dm = level;
                } else {
                    continue;
                }
                samples.push(Sample {
                    ts: current_ts,
                    dp: volts(dp),
                    dm: volts(dm),
                });
            }
            _ => {}
        }
    }
    anyhow::ensure!(dp_id.is_some(), "No wire named {:?} in the capture", dp_wire);
    anyhow::ensure!(dm_id.is_some(), "No wire named {:?} in the capture", dm_wire);
    Ok(samples)
}
