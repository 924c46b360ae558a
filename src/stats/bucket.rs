//! Aggregated bucket state (§4.5, §3): per-bucket running state specific to
//! the stat's modifier, with the aggregation rule and emitted metrics for
//! each.

use std::collections::HashSet;

use crate::stats::parse::{Modifier, Stat};

#[derive(Debug)]
enum State {
    Counter { total: f64 },
    Gauge { value: f64 },
    /// Used for both `ms` (timer) and `h` (histogram); each sample keeps
    /// its extrapolated weight (`1/sampling_rate`) for the count rule.
    Samples { values: Vec<f64>, weights: Vec<f64> },
    Set { values: HashSet<String> },
}

/// One named bucket's aggregated state, created on first stat and destroyed
/// after a periodic flush finds it empty and idle (§3 lifecycles).
#[derive(Debug)]
pub struct AggregatedBucket {
    pub modifier: Modifier,
    state: State,
    touched_since_flush: bool,
}

/// A flushed metric, ready to be rendered as graphite lines or message
/// fields depending on configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Flushed {
    Counter { total: f64, rate_per_sec: f64 },
    Gauge { value: f64 },
    Samples {
        count: u64,
        mean: f64,
        upper: f64,
        lower: f64,
        sum: f64,
        percentiles: Vec<(u8, f64)>,
    },
    Set { cardinality: usize },
}

impl AggregatedBucket {
    pub fn new(modifier: Modifier) -> Self {
        let state = match modifier {
            Modifier::Counter | Modifier::Meter => State::Counter { total: 0.0 },
            Modifier::Gauge => State::Gauge { value: 0.0 },
            Modifier::Timer | Modifier::Histogram => State::Samples {
                values: Vec::new(),
                weights: Vec::new(),
            },
            Modifier::Set => State::Set { values: HashSet::new() },
        };
        AggregatedBucket {
            modifier,
            state,
            touched_since_flush: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.touched_since_flush
    }

    /// Applies one stat's aggregation rule (§4.5).
    pub fn apply(&mut self, stat: &Stat) {
        self.touched_since_flush = true;
        match &mut self.state {
            State::Counter { total } => {
                if let Ok(v) = stat.value.parse::<f64>() {
                    *total += v / stat.sampling_rate.max(f32::MIN_POSITIVE) as f64;
                }
            }
            State::Gauge { value } => {
                if stat.value.starts_with('+') || stat.value.starts_with('-') {
                    if let Ok(delta) = stat.value.parse::<f64>() {
                        *value += delta;
                    }
                } else if let Ok(v) = stat.value.parse::<f64>() {
                    *value = v;
                }
            }
            State::Samples { values, weights } => {
                if let Ok(v) = stat.value.parse::<f64>() {
                    values.push(v);
                    weights.push(1.0 / stat.sampling_rate.max(f32::MIN_POSITIVE) as f64);
                }
            }
            State::Set { values } => {
                values.insert(stat.value.clone());
            }
        }
    }

    /// Produces the emitted metric for this window and resets
    /// window-scoped state (counters and samples reset; gauges persist
    /// their last value; sets reset).
    pub fn flush(&mut self, flush_interval_secs: f64, percentiles: &[u8]) -> Flushed {
        self.touched_since_flush = false;
        match &mut self.state {
            State::Counter { total } => {
                let t = *total;
                *total = 0.0;
                Flushed::Counter {
                    total: t,
                    rate_per_sec: if flush_interval_secs > 0.0 {
                        t / flush_interval_secs
                    } else {
                        0.0
                    },
                }
            }
            State::Gauge { value } => Flushed::Gauge { value: *value },
            State::Samples { values, weights } => {
                let mut sorted = values.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let count: f64 = weights.iter().sum();
                let sum: f64 = values.iter().sum();
                let mean = if values.is_empty() { 0.0 } else { sum / values.len() as f64 };
                let upper = sorted.last().copied().unwrap_or(0.0);
                let lower = sorted.first().copied().unwrap_or(0.0);
                let pct = percentiles
                    .iter()
                    .map(|&p| (p, percentile(&sorted, p)))
                    .collect();
                values.clear();
                weights.clear();
                Flushed::Samples {
                    count: count.round().max(0.0) as u64,
                    mean,
                    upper,
                    lower,
                    sum,
                    percentiles: pct,
                }
            }
            State::Set { values } => {
                let cardinality = values.len();
                values.clear();
                Flushed::Set { cardinality }
            }
        }
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[f64], p: u8) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p as f64 / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::parse::parse_line;

    #[test]
    fn counter_emits_total_and_rate() {
        let mut b = AggregatedBucket::new(Modifier::Counter);
        for _ in 0..3 {
            b.apply(&parse_line("stat.one:1|c").unwrap());
        }
        // End-to-end scenario 2.
        match b.flush(1.0, &[]) {
            Flushed::Counter { total, rate_per_sec } => {
                assert_eq!(total, 3.0);
                assert_eq!(rate_per_sec, 3.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sampled_counter_extrapolates() {
        // End-to-end scenario 3: 10|c|@0.5 twice -> 40.
        let mut b = AggregatedBucket::new(Modifier::Counter);
        for _ in 0..2 {
            b.apply(&parse_line("stat.a:10|c|@0.5").unwrap());
        }
        match b.flush(1.0, &[]) {
            Flushed::Counter { total, .. } => assert_eq!(total, 40.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gauge_deltas_scenario() {
        // End-to-end scenario 4.
        let mut b = AggregatedBucket::new(Modifier::Gauge);
        b.apply(&parse_line("g:100|g").unwrap());
        b.apply(&parse_line("g:-20|g").unwrap());
        b.apply(&parse_line("g:+5|g").unwrap());
        match b.flush(1.0, &[]) {
            Flushed::Gauge { value } => assert_eq!(value, 85.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gauge_plain_value_replaces() {
        let mut b = AggregatedBucket::new(Modifier::Gauge);
        b.apply(&parse_line("g:10|g").unwrap());
        b.apply(&parse_line("g:5|g").unwrap());
        match b.flush(1.0, &[]) {
            Flushed::Gauge { value } => assert_eq!(value, 5.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timer_emits_count_mean_upper_lower_sum() {
        let mut b = AggregatedBucket::new(Modifier::Timer);
        for v in [10.0, 20.0, 30.0] {
            b.apply(&parse_line(&format!("t:{v}|ms")).unwrap());
        }
        match b.flush(1.0, &[90]) {
            Flushed::Samples {
                count,
                mean,
                upper,
                lower,
                sum,
                percentiles,
            } => {
                assert_eq!(count, 3);
                assert_eq!(mean, 20.0);
                assert_eq!(upper, 30.0);
                assert_eq!(lower, 10.0);
                assert_eq!(sum, 60.0);
                assert_eq!(percentiles[0].0, 90);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn set_cardinality() {
        let mut b = AggregatedBucket::new(Modifier::Set);
        for v in ["a", "b", "a"] {
            b.apply(&parse_line(&format!("s:{v}|s")).unwrap());
        }
        match b.flush(1.0, &[]) {
            Flushed::Set { cardinality } => assert_eq!(cardinality, 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
