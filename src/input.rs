mod csv;
mod vcd;

use anyhow::{Context, Result};
use clap::ArgMatches;
use indicatif::{ProgressBar, ProgressStyle};

/// A single two-channel voltage sample from the capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds.
    pub ts: f64,
    /// D+ level in volts.
    pub dp: f64,
    /// D- level in volts.
    pub dm: f64,
}

/// Materializes the whole capture; decoding is a single lazy pass over the
/// returned buffer.
pub fn load_samples(path: &str, matches: &ArgMatches<'_>) -> Result<Vec<Sample>> {
    // display something while processing
    let progress_bar = ProgressBar::new(!0);
    progress_bar.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template(" {spinner} {msg}"),
    );
    progress_bar.set_message("Loading capture");
    progress_bar.enable_steady_tick(80);

    let file = std::fs::File::open(path).with_context(|| format!("Opening {:?}", path))?;
    let samples = if matches.is_present("vcd") {
        vcd::load(
            file,
            matches.value_of("dp").unwrap_or("dp"),
            matches.value_of("dm").unwrap_or("dm"),
        )
    } else {
        csv::load(file)
    };

    progress_bar.finish_and_clear();
    samples.with_context(|| format!("Loading {:?}", path))
}
