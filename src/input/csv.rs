use std::io::{BufRead, BufReader, Read};

use anyhow::{Context, Result};
use nom::{character::complete::space0, do_parse, named, number::complete::double, tag};

use super::Sample;

// One capture row: time, d+, d- with optional spaces after the separators,
// the way `ds1054z` and friends export.
named!(
    record<&str, (f64, f64, f64)>,
    do_parse!(
        space0
            >> ts: double
            >> tag!(",")
            >> space0
            >> dp: double
            >> tag!(",")
            >> space0
            >> dm: double
            >> ((ts, dp, dm))
    )
);

pub fn load<T: Read>(input: T) -> Result<Vec<Sample>> {
    let mut lines = BufReader::new(input).lines();

    // the first row carries the column labels
    lines
        .next()
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("Empty capture file"))?;

    let mut samples = Vec::new();
    for (nr, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (_, (ts, dp, dm)) = record(&line)
            .map_err(|e| anyhow::anyhow!("{:?}", e))
            .with_context(|| format!("Invalid record on line {}", nr + 2))?;
        samples.push(Sample { ts, dp, dm });
    }
    Ok(samples)
}
