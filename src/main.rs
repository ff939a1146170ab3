use anyhow::Context;
use clap::{value_t, App, Arg};
use colored::Colorize;

use usb_scope_parser::input;
use usb_scope_parser::report::Reporter;
use usb_scope_parser::usb::byte::ByteIteratorExt;
use usb_scope_parser::usb::packet::PacketIteratorExt;
use usb_scope_parser::usb::signal::{detect_speed, Levels, SignalIteratorExt};
use usb_scope_parser::usb::Speed;

fn main() -> anyhow::Result<()> {
    let matches = App::new("usb-scope-parser")
        .about("Decodes USB low-/full-speed packets from a two-channel capture of D+/D-")
        .args(&[
            Arg::from_usage("<file> 'Capture file: CSV rows of time,d+,d- (or VCD with --vcd)'"),
            Arg::from_usage("-s, --speed [speed] 'Bus speed of the device'")
                .possible_values(&["low", "full", "auto"])
                .default_value("auto"),
            Arg::from_usage("-t, --threshold [volts] 'Logic level cutoff for both channels'")
                .default_value("1.2"),
            Arg::from_usage(
                "--hysteresis [volts] 'Dead band around the cutoff; samples inside keep their previous level'",
            )
            .default_value("0"),
            Arg::from_usage("--vcd 'Input is a VCD file with digital d+/d- wires'"),
            Arg::from_usage("--dp [wire] 'VCD wire carrying d+'").default_value("dp"),
            Arg::from_usage("--dm [wire] 'VCD wire carrying d-'").default_value("dm"),
        ])
        .get_matches();

    let levels = Levels {
        threshold: value_t!(matches, "threshold", f64).unwrap_or_else(|e| e.exit()),
        hysteresis: value_t!(matches, "hysteresis", f64).unwrap_or_else(|e| e.exit()),
    };
    let requested = match matches.value_of("speed") {
        Some("low") => Some(Speed::Low),
        Some("full") => Some(Speed::Full),
        _ => None,
    };

    let samples = input::load_samples(matches.value_of("file").unwrap(), &matches)?;

    colored::control::set_override(true);

    // the activity scan gates decoding even when the polarity is forced
    let detected = detect_speed(&samples, levels).context("Speed detection")?;
    let speed = requested.unwrap_or(detected);
    if speed != detected {
        println!(
            "{} capture idles like {} but decoding as {}",
            "Warning:".yellow().bold(),
            detected,
            speed
        );
    }

    let mut reporter = Reporter::new();
    for (ts, event) in samples
        .iter()
        .copied()
        .into_signals(speed, levels)
        .into_bytes(speed)
        .into_packets()
    {
        reporter.event(ts, &event);
    }
    reporter.summary();

    Ok(())
}
