//! Self-reporting (§7): end-user visibility into plugin health is mostly
//! stderr log lines, plus a periodic message of a well-known type,
//! `heka.all-report`, carrying a snapshot of pool and plugin state so a
//! dashboard filter/output can pick it up like any other message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::message::{Field, FieldValue, Message};
use crate::pack::PackPool;
use crate::router::RouterHandle;

pub const REPORT_MESSAGE_TYPE: &str = "heka.all-report";

/// A named plugin's shared failure counter, as handed out by
/// [`crate::runner::RunnerContext::failure_count`].
#[derive(Clone)]
pub struct PluginReportHandle {
    pub name: String,
    pub failures: Arc<AtomicU64>,
}

/// Builds one `heka.all-report` message: one `<plugin>.failures` integer
/// field per registered plugin, plus pool capacity/available gauges.
pub fn build_report(pool: &PackPool, plugins: &[PluginReportHandle]) -> Message {
    let mut message = Message::new();
    message.msg_type = REPORT_MESSAGE_TYPE.to_string();
    message.logger = "heka".to_string();
    message.add_field(Field {
        name: "pool.capacity".into(),
        representation: String::new(),
        value: FieldValue::Integer(vec![pool.capacity() as i64]),
    });
    message.add_field(Field {
        name: "pool.available".into(),
        representation: String::new(),
        value: FieldValue::Integer(vec![pool.available() as i64]),
    });
    for plugin in plugins {
        message.add_field(Field {
            name: format!("{}.failures", plugin.name),
            representation: String::new(),
            value: FieldValue::Integer(vec![plugin.failures.load(Ordering::Relaxed) as i64]),
        });
    }
    message
}

/// Runs until `router` is shut down or the pool/plugins go away, injecting a
/// fresh report message into the router on every tick of `interval`.
pub async fn run_self_reporter(
    pool: PackPool,
    router: RouterHandle,
    plugins: Vec<PluginReportHandle>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !router.is_running() {
            return;
        }
        let report = build_report(&pool, &plugins);
        let pack = pool.acquire().await;
        pack.with_message_mut(|m| *m = report);
        if let Err(e) = router.inject(pack).await {
            warn!(error = %e, "failed to inject self-report message");
            return;
        }
    }
}
