//! Wire protocol: NDJSON framing and the frame model.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing with
//!   a per-line size limit.
//! - `frame`: outbound encoding and the closed-variant inbound classifier.

pub mod codec;
pub mod frame;

pub use frame::{classify, encode_outbound, InboundFrame, Notification, Response, TagSets};
