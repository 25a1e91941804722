#![forbid(unsafe_code)]

//! `muxlink`: correlated request/response client over one persistent
//! duplex connection.
//!
//! Frames are newline-delimited JSON objects. Every outbound request carries
//! a fresh `id` and a `type`; responses echo the `id` and are routed back to
//! the waiting caller. Frames the server sends on its own initiative are
//! handed to a notification handler.

pub mod client;
pub mod config;
pub mod errors;
pub mod wire;

pub use client::connection::ConnectionState;
pub use client::sink::LogLevel;
pub use client::transport::Endpoint;
pub use client::Client;
pub use config::ClientConfig;
pub use errors::{ClientError, Result};
pub use wire::Notification;
