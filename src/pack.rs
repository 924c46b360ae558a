//! Pack pool and reference counting (§4.1).
//!
//! A pool is a fixed-capacity set of recyclable [`Pack`]s. `acquire()` blocks
//! when the pool is exhausted rather than failing; exhaustion is the
//! engine's primary backpressure mechanism (§7e), never an error. Capacity
//! is enforced with a `tokio::sync::Semaphore`; each outstanding pack holds
//! one permit for its entire lifetime (from `acquire()` until its reference
//! count reaches zero), so a permit returning to the semaphore *is* the pack
//! going back to the free list. Reference counts are plain atomics: no mutex
//! sits on the acquire/release hot path.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::error;

use crate::error::PoolError;
use crate::message::Message;

struct PackInner {
    pool: Arc<PoolInner>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    refcount: AtomicI64,
    message: Mutex<Message>,
    /// Opaque checkpoint for buffered outputs.
    pub queue_cursor: Mutex<Option<String>>,
    /// Set by authenticated inputs; consulted by signer-restricted consumers.
    pub signer: Mutex<Option<String>>,
    pub decoded: AtomicBool,
}

/// A reusable container wrapping one [`Message`] plus routing metadata
/// (reference count, queue cursor, signer, decoded flag). Cheap to clone;
/// clones are references to the same underlying pack, mirroring the way the
/// router hands the same pack to every matching consumer.
#[derive(Clone)]
pub struct Pack {
    inner: Arc<PackInner>,
}

impl Pack {
    fn new(pool: Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Self {
        Pack {
            inner: Arc::new(PackInner {
                pool,
                permit: Mutex::new(Some(permit)),
                refcount: AtomicI64::new(1),
                message: Mutex::new(Message::new()),
                queue_cursor: Mutex::new(None),
                signer: Mutex::new(None),
                decoded: AtomicBool::new(false),
            }),
        }
    }

    /// Runs `f` against the pack's message under its lock. The router treats
    /// packs as read-only after first dispatch (§3); callers that need to
    /// mutate a delivered pack should take a deep copy instead.
    pub fn with_message<R>(&self, f: impl FnOnce(&Message) -> R) -> R {
        let msg = self.inner.message.lock().unwrap();
        f(&msg)
    }

    pub fn with_message_mut<R>(&self, f: impl FnOnce(&mut Message) -> R) -> R {
        let mut msg = self.inner.message.lock().unwrap();
        f(&mut msg)
    }

    pub fn current_refcount(&self) -> i64 {
        self.inner.refcount.load(Ordering::SeqCst)
    }

    pub fn is_decoded(&self) -> bool {
        self.inner.decoded.load(Ordering::SeqCst)
    }

    pub fn set_decoded(&self, decoded: bool) {
        self.inner.decoded.store(decoded, Ordering::SeqCst);
    }

    pub fn signer(&self) -> Option<String> {
        self.inner.signer.lock().unwrap().clone()
    }

    pub fn set_signer(&self, signer: Option<String>) {
        *self.inner.signer.lock().unwrap() = signer;
    }

    pub fn queue_cursor(&self) -> Option<String> {
        self.inner.queue_cursor.lock().unwrap().clone()
    }

    pub fn set_queue_cursor(&self, cursor: Option<String>) {
        *self.inner.queue_cursor.lock().unwrap() = cursor;
    }

    /// Identity comparison: two `Pack` clones referring to the same
    /// underlying slot are equal.
    pub fn same_slot(&self, other: &Pack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Atomically adds `n` to the reference count. Used by the router when
    /// handing the same pack to multiple matching consumers.
    pub fn retain(&self, n: i64) {
        self.inner.refcount.fetch_add(n, Ordering::SeqCst);
    }

    /// Decrements the reference count by one. When it reaches zero the
    /// message is cleared and the pack's capacity permit is dropped,
    /// returning it to the pool's free list. Decrementing below zero is a
    /// programming error and is fatal (§4.1).
    pub fn release(&self) -> Result<(), PoolError> {
        let prev = self.inner.refcount.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            // Restore the count so a caller that ignores this error doesn't
            // wedge the pool into a more deeply negative state.
            self.inner.refcount.fetch_add(1, Ordering::SeqCst);
            error!("pack released more times than retained (over-release)");
            return Err(PoolError::OverRelease);
        }
        if prev == 1 {
            self.inner.message.lock().unwrap().clear();
            *self.inner.queue_cursor.lock().unwrap() = None;
            *self.inner.signer.lock().unwrap() = None;
            self.inner.decoded.store(false, Ordering::SeqCst);
            // Dropping the permit returns the slot to the semaphore's free
            // count; this is the "push back onto the free list" step.
            self.inner.permit.lock().unwrap().take();
        }
        Ok(())
    }
}

struct PoolInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Handle to a fixed-capacity pack pool. Cheap to clone; every clone refers
/// to the same underlying capacity.
#[derive(Clone)]
pub struct PackPool {
    inner: Arc<PoolInner>,
}

impl PackPool {
    pub fn new(capacity: usize) -> Self {
        PackPool {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of packs currently available without blocking.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Returns a cleared pack with reference count 1, blocking while the
    /// pool is exhausted.
    pub async fn acquire(&self) -> Pack {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");
        Pack::new(self.inner.clone(), permit)
    }

    /// Non-blocking acquire; `None` if the pool is exhausted.
    pub fn try_acquire(&self) -> Option<Pack> {
        let permit = self.inner.semaphore.clone().try_acquire_owned().ok()?;
        Some(Pack::new(self.inner.clone(), permit))
    }
}
