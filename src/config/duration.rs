//! Human-readable durations (`1h30m0s`, `250ms`) for configuration fields.
//!
//! Use with `#[serde(with = "crate::config::duration")]`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

const NANOS_PER_UNIT: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("us", 1_000.0),
    ("µs", 1_000.0),
    ("ms", 1_000_000.0),
    ("s", 1_000_000_000.0),
    ("m", 60_000_000_000.0),
    ("h", 3_600_000_000_000.0),
];

/// Parse a duration such as `1h30m0s`, `1.5s` or `250ms`.
pub fn parse(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{}'", input))?;
        if number_len == 0 {
            return Err(format!("expected a number in duration '{}'", input));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration '{}'", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = NANOS_PER_UNIT
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| format!("unknown unit '{}' in duration '{}'", unit, input))?;
        total_nanos += value * scale;
        rest = &rest[unit_len..];
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Format a duration the way [`parse`] reads it back.
pub fn format(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let secs = duration.as_secs();
    let subsec = duration.subsec_nanos();
    if secs == 0 {
        return if subsec % 1_000_000 == 0 {
            format!("{}ms", subsec / 1_000_000)
        } else if subsec % 1_000 == 0 {
            format!("{}us", subsec / 1_000)
        } else {
            format!("{}ns", subsec)
        };
    }

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = if subsec == 0 {
        format!("{}", secs % 60)
    } else {
        let fraction = format!("{:09}", subsec);
        format!("{}.{}", secs % 60, fraction.trim_end_matches('0'))
    };

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
    }
}
