//! Correlated request/response client over one duplex connection.
//!
//! A [`Client`] owns one connection at a time. Callers on any number of
//! tasks issue [`Client::request`]s concurrently; each gets a fresh frame id
//! and a slot in the correlation table, registered **before** the frame is
//! written so a fast response can never arrive ahead of its entry. A single
//! reader task per connection routes responses back to their slots and
//! unsolicited notifications to the notification sink.
//!
//! Submodules:
//! - `pending`: the correlation table and its RAII guard.
//! - `connection`: connection state and the active link.
//! - `transport`: endpoint parsing, resolution, and transport open.
//! - `reader`: the inbound dispatcher task.
//! - `writer`: serialised frame writes.
//! - `sink`: the notification and log callbacks.

pub mod connection;
pub mod pending;
pub(crate) mod reader;
pub mod sink;
pub mod transport;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::config::ClientConfig;
use crate::wire::{encode_outbound, Notification, TagSets};
use crate::{ClientError, Result};

use self::connection::{registration_fields, Connection, ConnectionState, Link, REGISTER_KIND};
use self::pending::{Delivery, PendingGuard, PendingTable};
use self::reader::{run_reader, ReaderContext};
use self::sink::{LogLevel, LogSink, NotificationSink};
use self::transport::Endpoint;
use self::writer::FrameWriter;

/// State shared by every clone of one [`Client`].
struct Shared {
    config: ClientConfig,
    endpoint: Endpoint,
    tags: TagSets,
    pending: Arc<PendingTable>,
    notifications: Arc<NotificationSink>,
    log: Arc<LogSink>,
    connection: Arc<Connection>,
    /// Serialises `connect` and `close`.
    lifecycle: Mutex<()>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(link) = self.connection.detach() {
            link.cancel.cancel();
        }
    }
}

/// Handle to a multiplexed connection.
///
/// Cheap to clone; all clones share one connection, one correlation table,
/// and one pair of handlers. Dropping the last clone stops the reader.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Build a disconnected client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if `config` fails validation.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = Endpoint::parse(&config.endpoint)?;
        let tags = TagSets::from(&config.protocol);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                endpoint,
                tags,
                pending: Arc::new(PendingTable::new()),
                notifications: Arc::new(NotificationSink::default()),
                log: Arc::new(LogSink::default()),
                connection: Arc::new(Connection::new()),
                lifecycle: Mutex::new(()),
            }),
        })
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// The parsed server endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    // ── Connection management ────────────────────────────────────────────────

    /// Connect using the configured connect timeout.
    ///
    /// # Errors
    ///
    /// See [`Client::connect`].
    pub async fn connect_default(&self) -> Result<()> {
        self.connect(self.shared.config.connect_timeout()).await
    }

    /// Open the connection, start the reader, and announce this client.
    ///
    /// Succeeds immediately when already connected. Resolution and handshake
    /// together are bounded by `timeout`. The registration frame is
    /// fire-and-forget: a failure to write it is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connection` if the endpoint cannot be resolved,
    /// refuses the connection, or the handshake exceeds `timeout`. The state
    /// is `Disconnected` afterwards.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        let shared = &self.shared;
        let _lifecycle = shared.lifecycle.lock().await;

        if shared.connection.state() == ConnectionState::Connected {
            return Ok(());
        }

        shared.connection.begin_connecting();
        shared.log.emit(
            LogLevel::Info,
            &format!("connecting to {}", shared.endpoint),
        );

        let opened = match tokio::time::timeout(timeout, transport::open(&shared.endpoint)).await
        {
            Ok(Ok(halves)) => halves,
            Ok(Err(err)) => {
                shared.connection.abort_connecting();
                shared.log.emit(LogLevel::Warn, &format!("connect failed: {err}"));
                return Err(err);
            }
            Err(_) => {
                shared.connection.abort_connecting();
                let err = ClientError::Connection(format!(
                    "handshake with {} timed out after {timeout:?}",
                    shared.endpoint
                ));
                shared.log.emit(LogLevel::Warn, &format!("connect failed: {err}"));
                return Err(err);
            }
        };
        let (read_half, write_half) = opened;

        let generation = shared.connection.next_generation();
        let writer = Arc::new(FrameWriter::new(write_half));
        let cancel = CancellationToken::new();

        // The link must be in place before the reader runs, so an immediate
        // EOF is attributed to this generation.
        shared.connection.install(Link {
            generation,
            writer: Arc::clone(&writer),
            cancel: cancel.clone(),
        });

        let ctx = ReaderContext {
            generation,
            tags: shared.tags.clone(),
            max_frame_bytes: shared.config.protocol.max_frame_bytes,
            fail_pending_on_disconnect: shared.config.protocol.fail_pending_on_disconnect,
            pending: Arc::clone(&shared.pending),
            notifications: Arc::clone(&shared.notifications),
            log: Arc::clone(&shared.log),
            connection: Arc::clone(&shared.connection),
        };
        let span = info_span!("muxlink_reader", endpoint = %shared.endpoint, generation);
        tokio::spawn(run_reader(ctx, read_half, cancel).instrument(span));

        shared.log.emit(
            LogLevel::Info,
            &format!("connected to {} (generation {generation})", shared.endpoint),
        );

        let fields = registration_fields(&shared.config.client_name);
        let registered = match encode_outbound(REGISTER_KIND, &fields) {
            Ok(frame) => writer.write_line(frame.line).await,
            Err(err) => Err(err),
        };
        if let Err(err) = registered {
            shared.log.emit(
                LogLevel::Warn,
                &format!("registration frame not sent: {err}"),
            );
        }

        Ok(())
    }

    /// Close the connection.
    ///
    /// Idempotent. Stops the reader, shuts the write half down, marks the
    /// client `Disconnected`, and fails every pending request with a
    /// connection error.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connection` only if shutting the transport down
    /// fails or does not finish within the connect timeout; the client is
    /// `Disconnected` either way.
    pub async fn close(&self) -> Result<()> {
        let shared = &self.shared;
        let _lifecycle = shared.lifecycle.lock().await;

        let Some(link) = shared.connection.detach() else {
            return Ok(());
        };
        link.cancel.cancel();

        let failed = shared
            .pending
            .fail_all(&ClientError::Connection("connection closed".into()));
        shared.log.emit(
            LogLevel::Info,
            &format!(
                "closed connection to {} ({failed} pending request(s) failed)",
                shared.endpoint
            ),
        );

        // A write stalled on backpressure holds the writer; bound the wait.
        let limit = shared.config.connect_timeout();
        match tokio::time::timeout(limit, link.writer.shutdown()).await {
            Ok(shutdown) => shutdown,
            Err(_) => {
                let err = ClientError::Connection(format!(
                    "shutdown of {} timed out after {limit:?}",
                    shared.endpoint
                ));
                shared.log.emit(LogLevel::Warn, &err.to_string());
                Err(err)
            }
        }
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Follow connection state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe()
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    /// Fire-and-forget: write one frame of type `kind` without awaiting a
    /// response.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotConnected` when no connection is open (returned
    ///   without blocking).
    /// - `ClientError::Encoding` when `fields` is not a JSON object.
    /// - `ClientError::Connection` when the write fails.
    pub async fn send<T>(&self, kind: &str, fields: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let writer = self
            .shared
            .connection
            .writer()
            .ok_or(ClientError::NotConnected)?;
        let frame = encode_outbound(kind, fields)?;
        debug!(id = %frame.id, kind, "client: sending frame");
        writer.write_line(frame.line).await
    }

    /// Send a request and await its response, using the configured request
    /// timeout.
    ///
    /// # Errors
    ///
    /// See [`Client::request_with_cancel`].
    pub async fn request_default<T>(&self, kind: &str, fields: &T) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        self.request(kind, fields, self.shared.config.request_timeout())
            .await
    }

    /// Send a request and await its response for at most `timeout`.
    ///
    /// # Errors
    ///
    /// See [`Client::request_with_cancel`].
    pub async fn request<T>(&self, kind: &str, fields: &T, timeout: Duration) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        self.request_with_cancel(kind, fields, timeout, &CancellationToken::new())
            .await
    }

    /// Send a request and await exactly one outcome: the response, `cancel`
    /// firing, or `timeout` elapsing.
    ///
    /// The correlation slot is registered before the frame is written and is
    /// always de-registered before this returns, including when the future
    /// is dropped mid-flight.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotConnected` when no connection is open.
    /// - `ClientError::Encoding` when `fields` is not a JSON object.
    /// - `ClientError::Connection` when the write fails or the connection is
    ///   lost while waiting.
    /// - `ClientError::Timeout` when no response arrives within `timeout`.
    /// - `ClientError::Cancelled` when `cancel` fires first.
    /// - `ClientError::Remote` when the response has `success: false`.
    pub async fn request_with_cancel<T>(
        &self,
        kind: &str,
        fields: &T,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        let (generation, writer) = self
            .shared
            .connection
            .current()
            .ok_or(ClientError::NotConnected)?;
        let frame = encode_outbound(kind, fields)?;

        let (guard, slot) = self.register_on(generation, &frame.id, kind)?;
        debug!(id = %frame.id, kind, generation, "client: request registered");

        if let Err(err) = writer.write_line(frame.line).await {
            guard.release();
            return Err(err);
        }

        let outcome = tokio::select! {
            biased;

            delivery = slot => match delivery {
                Ok(Ok(response)) => response.into_result(kind),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ClientError::Connection(
                    "request slot dropped before delivery".into(),
                )),
            },

            () = cancel.cancelled() => Err(ClientError::Cancelled {
                kind: kind.to_owned(),
            }),

            () = tokio::time::sleep(timeout) => Err(ClientError::Timeout {
                kind: kind.to_owned(),
                after: timeout,
            }),
        };

        drop(guard);
        outcome
    }

    /// Register a correlation slot that belongs to link `generation`.
    ///
    /// A disconnect drain that ran between picking up the writer and
    /// registering would miss the new entry, so the link is re-checked
    /// after the insert.
    fn register_on(
        &self,
        generation: u64,
        id: &str,
        kind: &str,
    ) -> Result<(PendingGuard, oneshot::Receiver<Delivery>)> {
        let (guard, slot) = self.shared.pending.register(id, kind);
        if !self.shared.connection.is_current(generation) {
            drop(guard);
            return Err(ClientError::Connection("connection lost".into()));
        }
        Ok((guard, slot))
    }

    // ── Handlers & diagnostics ───────────────────────────────────────────────

    /// Replace the notification handler.
    ///
    /// The handler runs on the reader task for every notification frame and
    /// must not block; hand long work off to another task.
    pub fn set_notification_handler<F>(&self, handler: F)
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.shared.notifications.set(Arc::new(handler));
    }

    /// Remove the notification handler.
    pub fn clear_notification_handler(&self) {
        self.shared.notifications.clear();
    }

    /// Replace the log handler. Diagnostics keep flowing to `tracing` too.
    pub fn set_log_handler<F>(&self, handler: F)
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        self.shared.log.set(Arc::new(handler));
    }

    /// Remove the log handler.
    pub fn clear_log_handler(&self) {
        self.shared.log.clear();
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}
