//! Connection state and the currently active link.
//!
//! The state is published through a [`watch`] channel so anything outside
//! the client (a reconnect policy, a status line) can follow transitions.
//! The state and the link slot are always changed together under the slot
//! lock, so a snapshot never reports `Connected` without a writer behind it.
//!
//! Each link carries a generation number. A reader that outlives its link
//! (because `close` or a newer `connect` already replaced it) can therefore
//! never tear down a connection it does not own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::writer::FrameWriter;

/// Frame type of the identity announcement sent after every connect.
pub const REGISTER_KIND: &str = "register";

/// Point-in-time connection state.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport is open.
    #[default]
    Disconnected,
    /// A connect attempt is resolving or handshaking.
    Connecting,
    /// The transport is open and the reader is running.
    Connected,
}

/// Resources belonging to one open connection.
#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) generation: u64,
    pub(crate) writer: Arc<FrameWriter>,
    pub(crate) cancel: CancellationToken,
}

/// Connection state plus the active link, owned by one client.
#[derive(Debug)]
pub struct Connection {
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn begin_connecting(&self) {
        let _slot = self.slot();
        self.state.send_replace(ConnectionState::Connecting);
    }

    pub(crate) fn abort_connecting(&self) {
        let slot = self.slot();
        if slot.is_none() {
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Install a freshly opened link and mark the connection `Connected`.
    pub(crate) fn install(&self, link: Link) {
        let mut slot = self.slot();
        if let Some(old) = slot.replace(link) {
            old.cancel.cancel();
        }
        self.state.send_replace(ConnectionState::Connected);
    }

    /// Writer of the active link, if any.
    pub(crate) fn writer(&self) -> Option<Arc<FrameWriter>> {
        self.slot().as_ref().map(|link| Arc::clone(&link.writer))
    }

    /// Generation and writer of the active link, if any.
    pub(crate) fn current(&self) -> Option<(u64, Arc<FrameWriter>)> {
        self.slot()
            .as_ref()
            .map(|link| (link.generation, Arc::clone(&link.writer)))
    }

    /// Whether the active link is still `generation`.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|link| link.generation == generation)
    }

    /// Remove the active link unconditionally and mark `Disconnected`.
    pub(crate) fn detach(&self) -> Option<Link> {
        let mut slot = self.slot();
        let link = slot.take();
        self.state.send_replace(ConnectionState::Disconnected);
        link
    }

    /// Remove the active link only if it is still `generation`.
    pub(crate) fn detach_if_current(&self, generation: u64) -> Option<Link> {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(link) if link.generation == generation => {
                let link = slot.take();
                self.state.send_replace(ConnectionState::Disconnected);
                link
            }
            _ => None,
        }
    }
}

/// Fields of the registration frame announcing this client.
#[must_use]
pub fn registration_fields(client_name: &str) -> Value {
    json!({
        "client": client_name,
        "version": env!("CARGO_PKG_VERSION"),
        "pid": std::process::id(),
        "connected_at": chrono::Utc::now().to_rfc3339(),
    })
}
