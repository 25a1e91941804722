//! Frame writer shared by every caller of one connection.
//!
//! Writes go through a [`FramedWrite`] behind an async mutex held for the
//! whole write, so concurrent callers never interleave bytes and each caller
//! learns whether its own frame reached the transport.

use futures_util::SinkExt;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::client::transport::BoxedWriter;
use crate::wire::codec::FrameCodec;
use crate::{ClientError, Result};

/// Serialised access to the write half of a connection.
pub struct FrameWriter {
    sink: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
}

impl FrameWriter {
    /// Wrap the write half of a freshly opened transport.
    #[must_use]
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            sink: Mutex::new(FramedWrite::new(writer, FrameCodec::new())),
        }
    }

    /// Write one frame line (without trailing newline) and flush it.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connection` if the transport rejects the write.
    pub async fn write_line(&self, line: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(line).await.map_err(|e| {
            warn!(error = %e, "writer: frame write failed");
            ClientError::Connection(format!("write failed: {e}"))
        })
    }

    /// Flush pending bytes and shut the write half down.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connection` if the shutdown fails.
    pub async fn shutdown(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await.map_err(|e| {
            debug!(error = %e, "writer: shutdown failed");
            ClientError::Connection(format!("shutdown failed: {e}"))
        })
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}
