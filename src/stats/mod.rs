//! Stat accumulator (§4.5): a single task owns all aggregated bucket state
//! with no locks, fed by a bounded channel of [`parse::Stat`] tuples and a
//! flush-interval timer, exactly per the concurrency model in §4.5 and §5.

pub mod bucket;
pub mod parse;

pub use bucket::{AggregatedBucket, Flushed};
pub use parse::{parse_datagram, parse_line, Modifier, Stat};

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::{Field, FieldValue, Message};
use crate::pack::PackPool;
use crate::router::RouterHandle;

/// Cheap, cloneable handle producers use to submit stats without blocking
/// the accumulator task.
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::Sender<Stat>,
}

impl StatsHandle {
    /// `drop_stat` (§4.5): enqueues on a bounded channel; returns `true` if
    /// accepted, `false` if the channel was full. Never blocks.
    pub fn drop_stat(&self, stat: Stat) -> bool {
        self.tx.try_send(stat).is_ok()
    }
}

pub struct StatAccumulatorConfig {
    pub flush_interval: Duration,
    pub percentiles: Vec<u8>,
    pub emit_in_fields: bool,
    pub bucket_prefix: String,
    pub channel_capacity: usize,
}

impl Default for StatAccumulatorConfig {
    fn default() -> Self {
        StatAccumulatorConfig {
            flush_interval: Duration::from_secs(10),
            percentiles: vec![90, 99],
            emit_in_fields: false,
            bucket_prefix: String::new(),
            channel_capacity: 10_000,
        }
    }
}

pub struct StatAccumulator {
    buckets: HashMap<String, AggregatedBucket>,
    rx: mpsc::Receiver<Stat>,
    cfg: StatAccumulatorConfig,
    pool: PackPool,
    router: RouterHandle,
}

impl StatAccumulator {
    pub fn new(cfg: StatAccumulatorConfig, pool: PackPool, router: RouterHandle) -> (Self, StatsHandle) {
        let (tx, rx) = mpsc::channel(cfg.channel_capacity);
        let accumulator = StatAccumulator {
            buckets: HashMap::new(),
            rx,
            cfg,
            pool,
            router,
        };
        (accumulator, StatsHandle { tx })
    }

    /// Runs until the stats channel closes (all handles dropped). Flushes
    /// on every tick of `cfg.flush_interval`.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.cfg.flush_interval);
        loop {
            tokio::select! {
                biased;
                _ = ticker.tick() => self.flush_all().await,
                maybe_stat = self.rx.recv() => {
                    match maybe_stat {
                        Some(stat) => self.apply(stat),
                        None => {
                            self.flush_all().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn apply(&mut self, stat: Stat) {
        let bucket = self
            .buckets
            .entry(stat.bucket.clone())
            .or_insert_with(|| AggregatedBucket::new(stat.modifier));
        bucket.apply(&stat);
    }

    async fn flush_all(&mut self) {
        let interval_secs = self.cfg.flush_interval.as_secs_f64();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let mut emptied = Vec::new();
        let mut message = Message::new();
        message.msg_type = "heka.statmetric".to_string();
        message.timestamp = ts * 1_000_000_000;
        let mut payload_lines = Vec::new();

        for (name, bucket) in self.buckets.iter_mut() {
            let was_idle = bucket.is_idle();
            let flushed = bucket.flush(interval_secs, &self.cfg.percentiles);
            if self.cfg.emit_in_fields {
                append_fields(&mut message, &self.cfg.bucket_prefix, name, &flushed);
            } else {
                append_graphite_lines(&mut payload_lines, &self.cfg.bucket_prefix, name, &flushed, ts);
            }
            if was_idle && matches!(flushed, Flushed::Counter { total, .. } if total == 0.0) {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            self.buckets.remove(&name);
        }

        if !self.cfg.emit_in_fields {
            message.payload = payload_lines.join("\n");
        }
        if message.payload.is_empty() && message.fields.is_empty() {
            debug!("stat flush produced no metrics, skipping emission");
            return;
        }

        let pack = self.pool.acquire().await;
        pack.with_message_mut(|m| *m = message);
        if let Err(e) = self.router.inject(pack).await {
            warn!(error = %e, "failed to inject stat flush message");
        }
    }
}

fn append_graphite_lines(out: &mut Vec<String>, prefix: &str, name: &str, flushed: &Flushed, ts: i64) {
    match flushed {
        Flushed::Counter { total, rate_per_sec } => {
            out.push(format!("{prefix}{name}.count {total} {ts}"));
            out.push(format!("{prefix}{name}.rate {rate_per_sec} {ts}"));
        }
        Flushed::Gauge { value } => out.push(format!("{prefix}{name} {value} {ts}")),
        Flushed::Samples {
            count,
            mean,
            upper,
            lower,
            sum,
            percentiles,
        } => {
            out.push(format!("{prefix}{name}.count {count} {ts}"));
            out.push(format!("{prefix}{name}.mean {mean} {ts}"));
            out.push(format!("{prefix}{name}.upper {upper} {ts}"));
            out.push(format!("{prefix}{name}.lower {lower} {ts}"));
            out.push(format!("{prefix}{name}.sum {sum} {ts}"));
            for (p, v) in percentiles {
                out.push(format!("{prefix}{name}.percentile_{p} {v} {ts}"));
            }
        }
        Flushed::Set { cardinality } => out.push(format!("{prefix}{name}.count {cardinality} {ts}")),
    }
}

fn append_fields(message: &mut Message, prefix: &str, name: &str, flushed: &Flushed) {
    let push_int = |message: &mut Message, field_name: String, v: i64| {
        message.add_field(Field {
            name: field_name,
            representation: String::new(),
            value: FieldValue::Integer(vec![v]),
        });
    };
    let push_double = |message: &mut Message, field_name: String, v: f64| {
        message.add_field(Field {
            name: field_name,
            representation: String::new(),
            value: FieldValue::Double(vec![v]),
        });
    };
    match flushed {
        Flushed::Counter { total, rate_per_sec } => {
            push_int(message, format!("{prefix}{name}.count"), *total as i64);
            push_double(message, format!("{prefix}{name}.rate"), *rate_per_sec);
        }
        Flushed::Gauge { value } => push_double(message, format!("{prefix}{name}"), *value),
        Flushed::Samples {
            count,
            mean,
            upper,
            lower,
            sum,
            percentiles,
        } => {
            push_int(message, format!("{prefix}{name}.count"), *count as i64);
            push_double(message, format!("{prefix}{name}.mean"), *mean);
            push_double(message, format!("{prefix}{name}.upper"), *upper);
            push_double(message, format!("{prefix}{name}.lower"), *lower);
            push_double(message, format!("{prefix}{name}.sum"), *sum);
            for (p, v) in percentiles {
                push_double(message, format!("{prefix}{name}.percentile_{p}"), *v);
            }
        }
        Flushed::Set { cardinality } => push_int(message, format!("{prefix}{name}.count"), *cardinality as i64),
    }
}
