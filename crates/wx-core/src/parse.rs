//! Sensor line parsing.
//!
//! The sensor board emits a line-oriented text stream of the form
//! `<label>: <number>`, e.g. `Temperature: 21.5`.  The label is any
//! non-empty run of characters excluding `:`; the number must parse as a
//! finite float.  Anything else is a damaged line and is dropped by the
//! caller.

use regex::Regex;
use std::sync::OnceLock;

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:]+): ([0-9.]+)$").expect("line pattern is valid"))
}

/// Split a sensor line into `(label, value)`.
///
/// Returns `None` for lines that do not match the grammar or whose numeric
/// part does not parse as a finite float (e.g. `1.2.3`).
pub fn parse_sensor_line(line: &str) -> Option<(&str, f64)> {
    let caps = line_regex().captures(line)?;
    let label = caps.get(1)?.as_str();
    let value: f64 = caps.get(2)?.as_str().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((label, value))
}
