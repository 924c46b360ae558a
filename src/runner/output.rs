//! Output runner (§4.4): encodes packs, hands bytes to a transport, and
//! releases the pack once the transport acknowledges. Optionally wraps
//! bytes with the framed-stream header (§6) before handing them off.
//!
//! When a disk buffer (§4.7) is configured, `run_output` queues the encoded
//! bytes to it and releases the pack immediately instead of calling the
//! transport inline; [`run_disk_buffer_sender`] is the separate task that
//! drains the queue to the transport, backing off and retrying from the
//! same unadvanced cursor on a retryable failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use super::retry::{RetryPolicy, RetryState};
use super::RunnerContext;
use crate::buffer::DiskBuffer;
use crate::error::{BufferError, RunnerError};
use crate::framing::{self, HmacHashFunction};
use crate::pack::Pack;

#[async_trait]
pub trait Output: Send + Sync {
    fn name(&self) -> &str;

    /// Encodes a pack's message into transport-ready bytes.
    fn encode(&self, pack: &Pack) -> Result<Vec<u8>, RunnerError>;
}

/// A byte sink. Implementations classify failures as retryable
/// (`RunnerError::Retry`) or fatal (`RunnerError::Fatal`); retryable
/// failures are retried by the runner with exponential backoff.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), RunnerError>;
}

/// Optional framing applied before bytes reach the transport.
pub struct FramingConfig {
    pub enabled: bool,
    pub signer: Option<String>,
    pub key_version: u32,
    pub hash_function: HmacHashFunction,
    pub key: Vec<u8>,
}

/// A disk buffer shared between the output runner (which enqueues) and
/// [`run_disk_buffer_sender`] (which drains), guarded by a plain `Mutex`
/// since every operation is a brief, synchronous file access never held
/// across an `.await`.
pub type SharedDiskBuffer = Arc<Mutex<DiskBuffer>>;

pub async fn run_output(
    output: &dyn Output,
    transport: &mut dyn Transport,
    ctx: &RunnerContext,
    mut rx: mpsc::Receiver<Pack>,
    framing_cfg: Option<&FramingConfig>,
    retry_policy: RetryPolicy,
    disk_buffer: Option<&SharedDiskBuffer>,
) -> Result<(), RunnerError> {
    loop {
        tokio::select! {
            biased;
            _ = ctx.stopped() => return Ok(()),
            maybe_pack = rx.recv() => {
                let Some(pack) = maybe_pack else { return Ok(()) };
                let encoded = match output.encode(&pack) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        ctx.record_failure();
                        ctx.log_error(output.name(), &e);
                        let _ = pack.release();
                        continue;
                    }
                };
                let wire = match framing_cfg {
                    Some(cfg) if cfg.enabled => {
                        framing::encode_framed(&encoded, cfg.signer.clone(), cfg.key_version, cfg.hash_function, &cfg.key)
                    }
                    _ => encoded,
                };

                if let Some(buffer) = disk_buffer {
                    enqueue_to_disk_buffer(buffer, output.name(), &wire, ctx).await;
                    if let Err(e) = pack.release() {
                        ctx.log_error(output.name(), e);
                    }
                    continue;
                }

                let mut retry = RetryState::new(retry_policy);
                loop {
                    match transport.send(&wire).await {
                        Ok(()) => {
                            if let Err(e) = pack.release() {
                                ctx.log_error(output.name(), e);
                            }
                            break;
                        }
                        Err(RunnerError::Retry(msg)) => {
                            warn!(output = output.name(), error = %msg, attempt = retry.attempt(), "retrying output send");
                            if retry.exhausted() || !retry.wait(ctx).await {
                                ctx.record_failure();
                                let _ = pack.release();
                                break;
                            }
                        }
                        Err(e) => {
                            ctx.record_failure();
                            ctx.log_error(output.name(), &e);
                            let _ = pack.release();
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

/// Queues one record to disk, applying the configured full-queue policy.
/// `Block` spins with a short backoff until the sender has drained room;
/// `Drop`/`Shutdown` are logged and, for `Shutdown`, requested on `ctx` so
/// the rest of the process winds down too.
async fn enqueue_to_disk_buffer(buffer: &SharedDiskBuffer, output_name: &str, record: &[u8], ctx: &RunnerContext) {
    loop {
        let result = { buffer.lock().unwrap().enqueue(record) };
        match result {
            Ok(()) => return,
            Err(BufferError::PolicyBlock) => {
                if ctx.stop_requested() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(BufferError::PolicyDrop) => {
                ctx.record_failure();
                warn!(output = output_name, "disk buffer full, record dropped");
                return;
            }
            Err(e @ BufferError::PolicyShutdown) => {
                ctx.log_error(output_name, &e);
                ctx.request_stop();
                return;
            }
            Err(e) => {
                ctx.record_failure();
                ctx.log_error(output_name, &e);
                return;
            }
        }
    }
}

/// Drains `buffer` to `transport`: the separate sender side of the §4.7
/// contract. Peeks the next queued record, sends it, and only advances the
/// cursor on success; a retryable transport failure backs off per
/// `retry_policy` and retries the same record from the same cursor. Polls
/// at `poll_interval` when the queue is caught up.
pub async fn run_disk_buffer_sender(
    buffer: SharedDiskBuffer,
    transport: &mut dyn Transport,
    ctx: &RunnerContext,
    retry_policy: RetryPolicy,
    poll_interval: Duration,
) -> Result<(), RunnerError> {
    let mut retry = RetryState::new(retry_policy);
    loop {
        if ctx.stop_requested() {
            return Ok(());
        }
        let next = { buffer.lock().unwrap().peek_next() }.map_err(|e| RunnerError::Fatal(e.to_string()))?;
        let Some((record, offset)) = next else {
            tokio::select! {
                biased;
                _ = ctx.stopped() => return Ok(()),
                _ = tokio::time::sleep(poll_interval) => {}
            }
            continue;
        };
        match transport.send(&record).await {
            Ok(()) => {
                buffer
                    .lock()
                    .unwrap()
                    .advance_cursor(offset)
                    .map_err(|e| RunnerError::Fatal(e.to_string()))?;
                retry.reset();
            }
            Err(RunnerError::Retry(msg)) => {
                warn!(error = %msg, attempt = retry.attempt(), "disk buffer sender retrying record");
                if retry.exhausted() || !retry.wait(ctx).await {
                    ctx.record_failure();
                    return Ok(());
                }
            }
            Err(e) => {
                ctx.record_failure();
                ctx.log_error("disk_buffer_sender", &e);
                return Err(e);
            }
        }
    }
}
