//! Inbound dispatcher task.
//!
//! Reads NDJSON frames from the connection, classifies each one with
//! [`classify`], and routes it:
//!
//! | Classification                    | Route                                      |
//! |-----------------------------------|--------------------------------------------|
//! | [`InboundFrame::Response`]        | correlation table, by `id`                 |
//! | [`InboundFrame::Notification`]    | notification sink                          |
//! | [`InboundFrame::Unrecognized`]    | logged at `WARN`, skipped                  |
//!
//! The reader is driven by [`FramedRead`] backed by [`FrameCodec`], which
//! enforces the per-line limit before any JSON parsing happens and reports
//! an over-long line as [`InboundLine::TooLong`] rather than a stream error.
//! Malformed, unknown, and over-long frames never terminate the loop; only
//! EOF, an I/O error, or cancellation do.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::connection::Connection;
use crate::client::pending::PendingTable;
use crate::client::sink::{LogLevel, LogSink, NotificationSink};
use crate::client::transport::BoxedReader;
use crate::wire::codec::{FrameCodec, InboundLine};
use crate::wire::{classify, InboundFrame, TagSets};
use crate::ClientError;

/// Everything one reader task needs, cloned out of the client at connect.
pub(crate) struct ReaderContext {
    pub(crate) generation: u64,
    pub(crate) tags: TagSets,
    pub(crate) max_frame_bytes: usize,
    pub(crate) fail_pending_on_disconnect: bool,
    pub(crate) pending: Arc<PendingTable>,
    pub(crate) notifications: Arc<NotificationSink>,
    pub(crate) log: Arc<LogSink>,
    pub(crate) connection: Arc<Connection>,
}

/// Why the read loop stopped.
enum Exit {
    Cancelled,
    Eof,
    Failed(ClientError),
}

/// Reader task for one connection.
///
/// Returns when `cancel` fires (the client closed or was dropped), on EOF,
/// or on an I/O error. In the last two cases the connection is marked
/// `Disconnected` if this reader still owns it, and pending requests are
/// failed when `fail_pending_on_disconnect` is set.
pub(crate) async fn run_reader(ctx: ReaderContext, reader: BoxedReader, cancel: CancellationToken) {
    let mut framed = FramedRead::new(reader, FrameCodec::with_max_length(ctx.max_frame_bytes));

    let exit = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break Exit::Cancelled,

            item = framed.next() => match item {
                None => break Exit::Eof,
                Some(Err(e)) => break Exit::Failed(e),
                Some(Ok(InboundLine::TooLong { limit })) => {
                    ctx.log.emit(
                        LogLevel::Warn,
                        &format!("skipping inbound frame: line too long: exceeded {limit} bytes"),
                    );
                }
                Some(Ok(InboundLine::Frame(line))) => route(&ctx, &line),
            },
        }
    };

    let reason = match exit {
        Exit::Cancelled => {
            debug!(generation = ctx.generation, "reader: cancelled, stopping");
            return;
        }
        Exit::Eof => "connection closed by server".to_owned(),
        Exit::Failed(e) => format!("read failed: {e}"),
    };

    if ctx.connection.detach_if_current(ctx.generation).is_none() {
        debug!(generation = ctx.generation, %reason, "reader: stale link, leaving state alone");
        return;
    }

    ctx.log.emit(LogLevel::Warn, &format!("connection lost: {reason}"));

    if ctx.fail_pending_on_disconnect {
        let failed = ctx
            .pending
            .fail_all(&ClientError::Connection(format!("connection lost: {reason}")));
        if failed > 0 {
            ctx.log.emit(
                LogLevel::Warn,
                &format!("failed {failed} pending request(s) after disconnect"),
            );
        }
    }
}

/// Classify one line and hand it to its destination.
fn route(ctx: &ReaderContext, line: &str) {
    if line.trim().is_empty() {
        return;
    }

    match classify(line, &ctx.tags) {
        InboundFrame::Response(response) => {
            let id = response.id.clone();
            match ctx.pending.take(&id) {
                Some(entry) => {
                    let kind = entry.kind.clone();
                    let waited = entry.age();
                    if entry.resolve(Ok(response)) {
                        debug!(%id, %kind, ?waited, "reader: response delivered");
                    } else {
                        debug!(%id, %kind, "reader: caller gone, response dropped");
                    }
                }
                None => {
                    ctx.log.emit(
                        LogLevel::Debug,
                        &format!("discarding response for unknown request id '{id}'"),
                    );
                }
            }
        }
        InboundFrame::Notification(notification) => {
            ctx.notifications.dispatch(notification, &ctx.log);
        }
        InboundFrame::Unrecognized { kind, reason } => {
            ctx.log.emit(
                LogLevel::Warn,
                &format!(
                    "unrecognized frame (type {}): {reason}",
                    kind.as_deref().unwrap_or("<none>")
                ),
            );
        }
    }
}
