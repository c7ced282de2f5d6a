//! Human-readable bit rates (SI, base 1000), e.g. `"83 Mbps"`.

use thiserror::Error;

const SUFFIXES: [&str; 7] = ["bps", "Kbps", "Mbps", "Gbps", "Tbps", "Pbps", "Ebps"];

const UNITS: [(&str, u64); 5] = [
    ("bps", 1),
    ("kbps", 1_000),
    ("mbps", 1_000_000),
    ("gbps", 1_000_000_000),
    ("tbps", 1_000_000_000_000),
];

#[derive(Debug, Error, PartialEq)]
pub enum BitrateError {
    #[error("invalid number in {0:?}")]
    InvalidNumber(String),
    #[error("unhandled size name: {0:?}")]
    UnknownUnit(String),
    #[error("too large: {0:?}")]
    TooLarge(String),
}

/// Formats bits per second, keeping one decimal below 10 units.
pub fn humanize(bps: u64) -> String {
    if bps < 10 {
        return format!("{bps} b");
    }
    let mut unit = 1u64;
    let mut exp = 0;
    while bps / unit >= 1000 {
        unit *= 1000;
        exp += 1;
    }
    let val = ((bps as f64 / unit as f64) * 10.0 + 0.5).floor() / 10.0;
    if val < 10.0 {
        format!("{:.1} {}", val, SUFFIXES[exp])
    } else {
        format!("{:.0} {}", val, SUFFIXES[exp])
    }
}

/// Parses strings like `"1 Gbps"`, `"2.5mbps"` or `"1,000 kbps"`.
pub fn parse(s: &str) -> Result<u64, BitrateError> {
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);

    let value: f64 = num
        .replace(',', "")
        .parse()
        .map_err(|_| BitrateError::InvalidNumber(s.to_string()))?;

    let unit = unit.trim().to_ascii_lowercase();
    let (_, mult) = UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .ok_or(BitrateError::UnknownUnit(unit.clone()))?;

    let bps = value * *mult as f64;
    if bps >= u64::MAX as f64 {
        return Err(BitrateError::TooLarge(s.to_string()));
    }
    Ok(bps as u64)
}
