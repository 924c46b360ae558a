//! Statsd wire format parsing (§4.5).
//!
//! A datagram is newline-separated lines; each line is
//! `bucket:value|modifier[|@sample_rate]`. Invalid lines are reported
//! without aborting the rest of the batch.

use crate::error::StatsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Counter,
    Gauge,
    Timer,
    Histogram,
    Meter,
    Set,
}

impl Modifier {
    fn parse(s: &str) -> Result<Modifier, StatsError> {
        match s {
            "c" => Ok(Modifier::Counter),
            "g" => Ok(Modifier::Gauge),
            "ms" => Ok(Modifier::Timer),
            "h" => Ok(Modifier::Histogram),
            "m" => Ok(Modifier::Meter),
            "s" => Ok(Modifier::Set),
            other => Err(StatsError::UnknownModifier(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::Counter => "c",
            Modifier::Gauge => "g",
            Modifier::Timer => "ms",
            Modifier::Histogram => "h",
            Modifier::Meter => "m",
            Modifier::Set => "s",
        }
    }
}

/// A parsed `Stat` tuple (§3): bucket name, raw value text (kept as a
/// string so gauge deltas can retain their `+`/`-` prefix), modifier, and
/// sampling rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    pub bucket: String,
    pub value: String,
    pub modifier: Modifier,
    pub sampling_rate: f32,
}

/// Parses one statsd line. Blank lines are not errors; callers should skip
/// them before calling this (see [`parse_datagram`]).
pub fn parse_line(line: &str) -> Result<Stat, StatsError> {
    let (bucket, rest) = line
        .split_once(':')
        .ok_or_else(|| StatsError::BadLine(line.to_string()))?;
    if bucket.is_empty() {
        return Err(StatsError::BadLine(line.to_string()));
    }
    let mut parts = rest.split('|');
    let value = parts.next().ok_or_else(|| StatsError::BadLine(line.to_string()))?;
    if value.is_empty() {
        return Err(StatsError::BadLine(line.to_string()));
    }
    let modifier_str = parts.next().ok_or_else(|| StatsError::BadLine(line.to_string()))?;
    let modifier = Modifier::parse(modifier_str)?;

    let mut sampling_rate = 1.0f32;
    if let Some(rate_part) = parts.next() {
        let rate_str = rate_part
            .strip_prefix('@')
            .ok_or_else(|| StatsError::BadLine(line.to_string()))?;
        sampling_rate = rate_str
            .parse::<f32>()
            .map_err(|_| StatsError::BadLine(line.to_string()))?;
    }
    if parts.next().is_some() {
        return Err(StatsError::BadLine(line.to_string()));
    }

    Ok(Stat {
        bucket: bucket.to_string(),
        value: value.to_string(),
        modifier,
        sampling_rate,
    })
}

/// Serializes a `Stat` back to wire format, the inverse of [`parse_line`]
/// (P5: `parse(serialize(stat)) == stat`).
pub fn serialize_stat(stat: &Stat) -> String {
    if (stat.sampling_rate - 1.0).abs() < f32::EPSILON {
        format!("{}:{}|{}", stat.bucket, stat.value, stat.modifier.as_str())
    } else {
        format!(
            "{}:{}|{}|@{}",
            stat.bucket,
            stat.value,
            stat.modifier.as_str(),
            stat.sampling_rate
        )
    }
}

/// Parses a full datagram (possibly several newline-separated lines, with
/// blank lines allowed between valid ones). Returns the stats that parsed
/// successfully and the count of lines that did not.
pub fn parse_datagram(datagram: &str) -> (Vec<Stat>, usize) {
    let mut stats = Vec::new();
    let mut bad_lines = 0;
    for line in datagram.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(stat) => stats.push(stat),
            Err(_) => bad_lines += 1,
        }
    }
    (stats, bad_lines)
}
