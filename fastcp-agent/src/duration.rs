//! Duration parsing and formatting utilities

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 60 * 60 * 1_000_000_000,
        "d" => 24 * 60 * 60 * 1_000_000_000,
        _ => return None,
    })
}

/// Nanoseconds in `num_str` (digits, optionally with a fraction) of a unit
/// worth `multiplier` nanoseconds. Sub-nanosecond remainders are dropped.
fn component_nanos(num_str: &str, multiplier: u128) -> Option<u128> {
    let (whole, frac) = match num_str.split_once('.') {
        Some((w, f)) => (w, f),
        None => (num_str, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(multiplier)?;
    let mut scale = 1u128;
    for digit in frac.chars() {
        scale = scale.checked_mul(10)?;
        let d = u128::from(digit.to_digit(10)?);
        nanos = nanos.checked_add(d.checked_mul(multiplier)? / scale)?;
    }
    Some(nanos)
}

fn parse_components(s: &str, lenient: bool) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    // A lone number keeps the historical "seconds by default" meaning.
    if lenient && s.chars().all(|c| c.is_ascii_digit()) {
        let secs: u64 = s
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;
        return Ok(Duration::from_secs(secs));
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !is_number(c))
            .ok_or_else(|| format!("Missing unit in duration: {}", s))?;
        if num_end == 0 {
            return Err(format!("Invalid number in duration: {}", s));
        }
        let (num_str, after) = rest.split_at(num_end);
        let unit_end = after.find(is_number).unwrap_or(after.len());
        let (unit, next) = after.split_at(unit_end);

        // Strict mode takes the proxy's units exactly as written: no days, no capitals.
        let multiplier = if lenient {
            unit_nanos(&unit.to_lowercase())
        } else {
            unit_nanos(unit).filter(|_| unit != "d")
        }
        .ok_or_else(|| format!("Unknown duration unit: {}", unit))?;
        let nanos = component_nanos(num_str, multiplier)
            .ok_or_else(|| format!("Invalid number in duration: {}", num_str))?;
        total = total
            .checked_add(nanos)
            .ok_or_else(|| format!("Duration value too large: {}", s))?;
        rest = next;
    }

    let secs = u64::try_from(total / 1_000_000_000)
        .map_err(|_| format!("Duration value too large: {}", s))?;
    Ok(Duration::new(secs, (total % 1_000_000_000) as u32))
}

/// Parse duration string (e.g., "10s", "5m", "1h", "150ms", "1m30s").
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    parse_components(s, true)
}

/// The proxy's own duration syntax: every component carries a lower-case unit
/// up to `h`, and components may be fractional (`"1.5s"`, `"2.5m"`).
pub fn parse_strict_duration(s: &str) -> std::result::Result<Duration, String> {
    parse_components(s, false)
}

/// Format duration as string (e.g., "10s", "5m", "1h", "100ms")
pub fn format_duration(duration: &Duration) -> String {
    let nanos = duration.as_nanos();

    if nanos == 0 {
        return "0s".to_string();
    }

    const MS: u128 = 1_000_000;
    const S: u128 = 1_000 * MS;
    const M: u128 = 60 * S;
    const H: u128 = 60 * M;
    const D: u128 = 24 * H;

    // Use the largest unit that divides evenly
    if nanos.is_multiple_of(D) {
        format!("{}d", nanos / D)
    } else if nanos.is_multiple_of(H) {
        format!("{}h", nanos / H)
    } else if nanos.is_multiple_of(M) {
        format!("{}m", nanos / M)
    } else if nanos.is_multiple_of(S) {
        format!("{}s", nanos / S)
    } else if nanos.is_multiple_of(MS) {
        format!("{}ms", nanos / MS)
    } else {
        format!("{}ns", nanos)
    }
}

/// Deserialize duration from string like "10s", "5m", "1h"
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Serialize duration to string like "10s", "5m", "1h", "100ms"
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(duration))
}
