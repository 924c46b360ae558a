//! Plugin runner contract (§4.4).
//!
//! Five kinds of plugin, each wrapped by a runner that gives it access to
//! the pack pool, the router, a ticker, and diagnostic logging, the way the
//! plugin pipeline elsewhere in this codebase threads a shared context
//! through every registered plugin rather than letting each one reach for
//! ambient state.

pub mod decoder;
pub mod filter;
pub mod input;
pub mod output;
pub mod splitter;
pub mod retry;

pub use decoder::Decoder;
pub use filter::Filter;
pub use input::Input;
pub use output::Output;
pub use retry::{RetryPolicy, RetryState};
pub use splitter::{SplitOutcome, Splitter};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error};

use crate::pack::PackPool;
use crate::router::RouterHandle;

/// Shared context threaded through every concrete runner task: access to the
/// pack pool and the router, a cooperative stop signal, and a
/// process-message-failures counter (§4.4 decoder runner contract).
#[derive(Clone)]
pub struct RunnerContext {
    pub pool: PackPool,
    pub router: RouterHandle,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    failures: Arc<AtomicU64>,
}

impl RunnerContext {
    pub fn new(pool: PackPool, router: RouterHandle) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        RunnerContext {
            pool,
            router,
            stop_tx,
            stop_rx,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Requests the owning runner to stop; observed within one tick of its
    /// scheduling period (§5).
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Resolves once `request_stop` has been called; usable in a
    /// `tokio::select!` alongside a plugin's own I/O or ticker. Built on
    /// `watch` rather than `Notify` so a `request_stop` landing between the
    /// initial check and the wait can never be missed: the channel carries
    /// the current value, not a one-shot wakeup, so there is no gap to race.
    pub async fn stopped(&self) {
        let mut rx = self.stop_rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn log_error(&self, plugin: &str, err: impl std::fmt::Display) {
        error!(plugin, %err, "plugin error");
    }

    pub fn log_message(&self, plugin: &str, msg: impl std::fmt::Display) {
        debug!(plugin, %msg, "plugin message");
    }

    /// `new_pack()` from §4.4's input-runner contract: acquire a cleared
    /// pack from the pool, blocking under backpressure.
    pub async fn new_pack(&self) -> crate::pack::Pack {
        self.pool.acquire().await
    }

    /// `inject(Pack)` from §4.4: hand a pack to the router.
    pub async fn inject(&self, pack: crate::pack::Pack) -> Result<(), crate::error::RouterError> {
        self.router.inject(pack).await
    }
}

/// A ticker handed to long-running runners (input, filter) so they can act
/// on a configured interval alongside their normal I/O.
pub fn ticker(interval: std::time::Duration) -> tokio::time::Interval {
    tokio::time::interval(interval)
}
