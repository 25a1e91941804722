//! NDJSON frame codec.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving server cannot make the reader allocate without bound for a
//! single frame.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound). Both directions frame UTF-8
//! lines delimited by `\n`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{ClientError, Result};

/// Default maximum inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One unit produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    /// A complete line, delimiter stripped.
    Frame(String),
    /// A line longer than `limit` bytes was dropped; decoding resumes after
    /// its `\n`.
    TooLong {
        /// The limit in force.
        limit: usize,
    },
}

/// NDJSON codec for the client's duplex connection.
///
/// # Decoder
///
/// Inbound lines longer than the configured limit yield
/// [`InboundLine::TooLong`] instead of an error, so the framed stream stays
/// in its decoding state and frames already buffered behind the dropped line
/// are not held back until more bytes arrive. The rest of that line is
/// discarded up to the next `\n`.
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`. The length limit is a
/// decoder-side concern and is not enforced when encoding.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom inbound line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    /// The inbound line limit in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn lift(
        &self,
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<InboundLine>> {
        match decoded {
            Ok(line) => Ok(line.map(InboundLine::Frame)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(InboundLine::TooLong {
                limit: self.max_length,
            })),
            Err(LinesCodecError::Io(e)) => Err(ClientError::Io(e.to_string())),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = InboundLine;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode(src);
        self.lift(decoded)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode_eof(src);
        self.lift(decoded)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = ClientError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner
            .encode(item, dst)
            .map_err(|e| ClientError::Io(e.to_string()))
    }
}
