//! Duration-string grammar: `^\d+(m|h)$`. Zero-duration stages are
//! permitted (used for the terminal 100% stage).

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(m|h)$").unwrap());

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid duration string '{0}', expected e.g. '5m' or '1h'")]
pub struct DurationParseError(pub String);

pub fn parse_duration(raw: &str) -> Result<chrono::Duration, DurationParseError> {
    let caps = DURATION_RE
        .captures(raw)
        .ok_or_else(|| DurationParseError(raw.to_string()))?;
    let amount: i64 = caps[1].parse().map_err(|_| DurationParseError(raw.to_string()))?;
    match &caps[2] {
        "m" => Ok(chrono::Duration::minutes(amount)),
        "h" => Ok(chrono::Duration::hours(amount)),
        _ => unreachable!(),
    }
}
