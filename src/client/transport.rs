//! Endpoint resolution and transport open.
//!
//! A transport is any duplex byte stream split into boxed read and write
//! halves. Two are supported: TCP, and local sockets (named pipe on Windows,
//! Unix domain socket elsewhere) through the `interprocess` crate.

use std::fmt::{Display, Formatter};

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericFilePath, GenericNamespaced, ToFsName, ToNsName};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::{ClientError, Result};

/// Read half of an open transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an open transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port` or bare `host:port`.
    Tcp {
        /// Host name or IP literal.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// `local:<name>`: namespaced local socket.
    Local(String),
    /// `unix:<path>`: filesystem local socket.
    Unix(String),
}

impl Endpoint {
    /// Parse an endpoint string.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` for empty input, unknown schemes,
    /// missing or invalid ports, and empty socket names.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ClientError::Config("endpoint must not be empty".into()));
        }

        if let Some(name) = raw.strip_prefix("local:") {
            return non_empty(name, raw).map(|n| Self::Local(n.to_owned()));
        }
        if let Some(path) = raw.strip_prefix("unix:") {
            return non_empty(path, raw).map(|p| Self::Unix(p.to_owned()));
        }

        let authority = match raw.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some((scheme, _)) => {
                return Err(ClientError::Config(format!(
                    "unsupported endpoint scheme '{scheme}' in '{raw}'"
                )))
            }
            None => raw,
        };
        let authority = authority.trim_end_matches('/');

        let (host, port) = authority.rsplit_once(':').ok_or_else(|| {
            ClientError::Config(format!("endpoint '{raw}' is missing a port"))
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ClientError::Config(format!(
                "endpoint '{raw}' is missing a host"
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|err| ClientError::Config(format!("endpoint '{raw}' has invalid port: {err}")))?;

        Ok(Self::Tcp {
            host: host.to_owned(),
            port,
        })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Local(name) => write!(f, "local:{name}"),
            Self::Unix(path) => write!(f, "unix:{path}"),
        }
    }
}

fn non_empty<'a>(value: &'a str, raw: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        Err(ClientError::Config(format!(
            "endpoint '{raw}' is missing a socket name"
        )))
    } else {
        Ok(value)
    }
}

/// Resolve `endpoint` and open a transport to it.
///
/// TCP hosts are resolved with the system resolver and each address is
/// tried in order until one accepts. The caller bounds the whole call with
/// its connect timeout.
///
/// # Errors
///
/// Returns `ClientError::Connection` if resolution yields no address or no
/// address accepts the connection.
pub async fn open(endpoint: &Endpoint) -> Result<(BoxedReader, BoxedWriter)> {
    match endpoint {
        Endpoint::Tcp { host, port } => open_tcp(host, *port).await,
        Endpoint::Local(name) => {
            let ns_name = name
                .as_str()
                .to_ns_name::<GenericNamespaced>()
                .map_err(|err| {
                    ClientError::Connection(format!("invalid local socket name '{name}': {err}"))
                })?;
            let stream = LocalSocketStream::connect(ns_name).await.map_err(|err| {
                ClientError::Connection(format!("failed to connect to local:{name}: {err}"))
            })?;
            let (reader, writer) = stream.split();
            Ok((Box::new(reader), Box::new(writer)))
        }
        Endpoint::Unix(path) => {
            let fs_name = path
                .as_str()
                .to_fs_name::<GenericFilePath>()
                .map_err(|err| {
                    ClientError::Connection(format!("invalid socket path '{path}': {err}"))
                })?;
            let stream = LocalSocketStream::connect(fs_name).await.map_err(|err| {
                ClientError::Connection(format!("failed to connect to unix:{path}: {err}"))
            })?;
            let (reader, writer) = stream.split();
            Ok((Box::new(reader), Box::new(writer)))
        }
    }
}

async fn open_tcp(host: &str, port: u16) -> Result<(BoxedReader, BoxedWriter)> {
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| ClientError::Connection(format!("failed to resolve {host}:{port}: {err}")))?
        .collect();

    if addrs.is_empty() {
        return Err(ClientError::Connection(format!(
            "{host}:{port} resolved to no addresses"
        )));
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(%addr, %err, "transport: failed to set TCP_NODELAY");
                }
                debug!(%addr, "transport: tcp connected");
                let (reader, writer) = stream.into_split();
                return Ok((Box::new(reader), Box::new(writer)));
            }
            Err(err) => {
                debug!(%addr, %err, "transport: tcp connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(ClientError::Connection(format!(
        "failed to connect to {host}:{port}: {}",
        last_err.map_or_else(|| "no address accepted".to_owned(), |e| e.to_string())
    )))
}
