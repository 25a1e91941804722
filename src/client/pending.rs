//! Correlation table: request id → single-use delivery slot.
//!
//! Every insert and remove happens under one exclusive lock. The lock is a
//! plain [`std::sync::Mutex`] because no critical section awaits, and because
//! [`PendingGuard`] must be able to de-register from `Drop`.
//!
//! Exactly-once delivery rests on [`PendingTable::take`]: the reader (on
//! delivery), the caller (on timeout, cancellation, drop, or write failure)
//! and the disconnect drain all remove entries through it, and whichever side
//! removes an entry first is the only one that can resolve its slot. The
//! value handoff itself happens after the lock is released, and a `oneshot`
//! send never blocks, so a slow or vanished caller cannot stall the reader.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::wire::Response;
use crate::{ClientError, Result};

/// Value handed from the reader (or disconnect drain) to the waiting caller.
pub type Delivery = Result<Response>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    /// Correlation identifier.
    pub id: String,
    /// Request `type` discriminator.
    pub kind: String,
    /// When the slot was registered.
    pub registered_at: Instant,
    slot: oneshot::Sender<Delivery>,
}

impl PendingRequest {
    /// Time spent outstanding so far.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }

    /// Resolve the slot. Returns `false` if the caller already went away.
    pub fn resolve(self, delivery: Delivery) -> bool {
        self.slot.send(delivery).is_ok()
    }
}

/// Mapping of request id to pending delivery slot.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        // Entries stay consistent across a panic elsewhere: every mutation
        // is a single insert or remove.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a delivery slot for `id`.
    ///
    /// Returns the guard that de-registers on drop and the receiving half
    /// the caller awaits.
    #[must_use]
    pub fn register(
        self: &Arc<Self>,
        id: &str,
        kind: &str,
    ) -> (PendingGuard, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        let entry = PendingRequest {
            id: id.to_owned(),
            kind: kind.to_owned(),
            registered_at: Instant::now(),
            slot: tx,
        };

        let replaced = self.lock().insert(id.to_owned(), entry);
        if let Some(old) = replaced {
            warn!(id, kind = %old.kind, "pending: replaced entry with duplicate id");
        }

        let guard = PendingGuard {
            table: Arc::clone(self),
            id: id.to_owned(),
        };
        (guard, rx)
    }

    /// Atomically remove and return the entry for `id`, if present.
    #[must_use]
    pub fn take(&self, id: &str) -> Option<PendingRequest> {
        self.lock().remove(id)
    }

    /// Remove the entry for `id` and hand it `delivery`.
    ///
    /// Returns `true` only when an entry existed and its caller was still
    /// waiting.
    pub fn deliver(&self, id: &str, delivery: Delivery) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };
        let kind = entry.kind.clone();
        let delivered = entry.resolve(delivery);
        if !delivered {
            debug!(id, %kind, "pending: caller dropped before delivery");
        }
        delivered
    }

    /// Drain every entry and resolve each with a clone of `error`.
    ///
    /// Returns the number of entries drained.
    pub fn fail_all(&self, error: &ClientError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut entries = self.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.resolve(Err(error.clone()));
        }
        count
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no request is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Identifiers of outstanding requests, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// De-registers its request id when dropped.
///
/// Holding the guard for the whole lifetime of a request future means a
/// timeout, a cancellation, a failed write, or the future simply being
/// dropped all leave the table as it was before the call.
#[derive(Debug)]
pub struct PendingGuard {
    table: Arc<PendingTable>,
    id: String,
}

impl PendingGuard {
    /// The guarded request id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// De-register now. Returns `true` if this call removed the entry,
    /// `false` if the reader (or a disconnect) already claimed it.
    pub fn release(self) -> bool {
        self.table.take(&self.id).is_some()
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let _ = self.table.take(&self.id);
    }
}
