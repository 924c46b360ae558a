//! The router (§4.3): a single task that dispatches every pack received on
//! its ingress channel to each registered consumer whose matcher evaluates
//! true. One task, one flat consumer list, no locks: this is the design
//! that gives a total order on dispatch and eliminates inter-plugin races.
//!
//! [`RouterHandle`] is the cheap, cloneable side callers use to inject packs
//! and request shutdown, mirroring the split between a long-lived routing
//! task and its handle used elsewhere in this codebase for task-owned
//! state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::error::RouterError;
use crate::matcher::MatcherSpecification;
use crate::pack::{Pack, PackPool};

/// A registered consumer: a name for diagnostics, its compiled matcher, an
/// optional signer restriction, whether the process may exit if this
/// consumer fails fatally, and the bounded delivery channel the router
/// pushes matching packs onto.
struct Consumer {
    name: String,
    matcher: MatcherSpecification,
    signer: Option<String>,
    #[allow(dead_code)]
    can_exit: bool,
    tx: mpsc::Sender<Pack>,
}

/// Cheap, cloneable handle used to inject packs into the router and to
/// request shutdown. Every input plugin holds one.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<Pack>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl RouterHandle {
    /// Hands a pack to the router, awaiting room in the ingress channel if
    /// it is full (this is how pool exhaustion propagates backpressure all
    /// the way to inputs).
    pub async fn inject(&self, pack: Pack) -> Result<(), RouterError> {
        self.tx.send(pack).await.map_err(|_| RouterError::IngressClosed)
    }

    /// Non-blocking inject; `Err` if the ingress channel is full or closed.
    pub fn try_inject(&self, pack: Pack) -> Result<(), RouterError> {
        self.tx.try_send(pack).map_err(|_| RouterError::IngressClosed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests a graceful shutdown: the router drains its ingress channel,
    /// releases in-flight packs, and closes consumer channels in reverse
    /// registration order.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}

/// The router task itself. Built with [`Router::new`], wired up with
/// [`Router::register`] for each consumer, then consumed by [`Router::run`].
pub struct Router {
    pool: PackPool,
    consumers: Vec<Consumer>,
    ingress_tx: mpsc::Sender<Pack>,
    ingress_rx: mpsc::Receiver<Pack>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl Router {
    pub fn new(pool: PackPool, ingress_capacity: usize) -> Self {
        let (ingress_tx, ingress_rx) = mpsc::channel(ingress_capacity);
        Router {
            pool,
            consumers: Vec::new(),
            ingress_tx,
            ingress_rx,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            tx: self.ingress_tx.clone(),
            shutdown: self.shutdown.clone(),
            running: self.running.clone(),
        }
    }

    /// Registers a consumer (in the order they should be dispatched to, and
    /// the reverse order their channel is closed on shutdown) and returns
    /// the receiving end of its delivery channel for the consumer's own
    /// runner task to read from.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        matcher: MatcherSpecification,
        signer: Option<String>,
        can_exit: bool,
        delivery_capacity: usize,
    ) -> mpsc::Receiver<Pack> {
        let (tx, rx) = mpsc::channel(delivery_capacity);
        self.consumers.push(Consumer {
            name: name.into(),
            matcher,
            signer,
            can_exit,
            tx,
        });
        rx
    }

    /// Runs the router until shutdown is requested or the ingress channel
    /// closes (all `RouterHandle`s dropped).
    pub async fn run(mut self) {
        self.running.store(true, Ordering::SeqCst);
        info!(consumers = self.consumers.len(), "router started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("router shutdown requested");
                    break;
                }
                maybe_pack = self.ingress_rx.recv() => {
                    match maybe_pack {
                        Some(pack) => self.dispatch(pack).await,
                        None => {
                            info!("router ingress channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.ingress_rx.close();
        while let Ok(pack) = self.ingress_rx.try_recv() {
            if let Err(e) = pack.release() {
                error!(error = %e, "releasing in-flight pack during shutdown");
            }
        }

        for consumer in self.consumers.drain(..).rev() {
            debug!(consumer = %consumer.name, "closing consumer delivery channel");
            drop(consumer.tx);
        }
        info!("router shut down");
    }

    /// Dispatch algorithm (§4.3): for each registered consumer, in
    /// registration order, skip on signer mismatch, evaluate the matcher,
    /// and on a match retain a reference and push onto the consumer's
    /// channel. The router's own reference is released once at the end; if
    /// nothing matched this returns the pack to the pool immediately.
    async fn dispatch(&self, pack: Pack) {
        for consumer in &self.consumers {
            if let Some(ref required) = consumer.signer {
                if pack.signer().as_deref() != Some(required.as_str()) {
                    continue;
                }
            }
            let matched = pack.with_message(|m| consumer.matcher.eval(m));
            if !matched {
                continue;
            }
            pack.retain(1);
            if consumer.tx.send(pack.clone()).await.is_err() {
                warn!(consumer = %consumer.name, "consumer delivery channel closed, dropping delivery");
                if let Err(e) = pack.release() {
                    error!(error = %e, "releasing undeliverable pack reference");
                }
            }
        }
        if let Err(e) = pack.release() {
            error!(error = %e, "releasing router's own pack reference");
        }
    }

    pub fn pool(&self) -> &PackPool {
        &self.pool
    }
}
