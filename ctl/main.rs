#![forbid(unsafe_code)]

//! `muxlink-ctl`: command-line companion for the `muxlink` client.
//!
//! Connects to a server, issues one request or fire-and-forget frame, or
//! streams notifications as JSON lines.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use muxlink::{Client, ClientConfig, ClientError, Notification, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "muxlink-ctl", about = "Command-line client for muxlink servers", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server endpoint; overrides the config file.
    ///
    /// Accepts `tcp://host:port`, `host:port`, `local:<name>`, or
    /// `unix:<path>`.
    #[arg(long)]
    endpoint: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a request and print the response data.
    Request {
        /// Frame `type`.
        kind: String,
        /// Request fields as a JSON object.
        #[arg(long, default_value = "{}")]
        fields: String,
        /// Response deadline in seconds; defaults to the configured value.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Send a frame without waiting for a response.
    Send {
        /// Frame `type`.
        kind: String,
        /// Frame fields as a JSON object.
        #[arg(long, default_value = "{}")]
        fields: String,
    },

    /// Print notifications as JSON lines.
    Watch {
        /// Stop after this many seconds; runs until ctrl-c when omitted.
        #[arg(long)]
        seconds: Option<u64>,
    },
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ClientError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    if let Err(err) = outcome {
        error!(%err, "muxlink-ctl failed");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.endpoint)?;
    let client = Client::new(config)?;
    client.connect_default().await?;
    info!(endpoint = %client.endpoint(), "connected");

    let result = match args.command {
        Command::Request {
            kind,
            fields,
            timeout,
        } => {
            let fields = parse_fields(&fields)?;
            let timeout = timeout.map_or_else(
                || client.config().request_timeout(),
                Duration::from_secs,
            );
            let data = client.request(&kind, &fields, timeout).await;
            data.map(|value| print_json(&value, true))
        }
        Command::Send { kind, fields } => {
            let fields = parse_fields(&fields)?;
            client.send(&kind, &fields).await.map(|()| println!("OK"))
        }
        Command::Watch { seconds } => watch(&client, seconds).await,
    };

    let closed = client.close().await;
    result.and(closed)
}

fn load_config(path: Option<&std::path::Path>, endpoint: Option<String>) -> Result<ClientConfig> {
    let mut config = match (path, endpoint.as_deref()) {
        (Some(path), _) => ClientConfig::load_from_path(path)?,
        (None, Some(endpoint)) => ClientConfig::new(endpoint),
        (None, None) => {
            return Err(ClientError::Config(
                "either --config or --endpoint is required".into(),
            ))
        }
    };
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    config.validate()?;
    Ok(config)
}

fn parse_fields(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ClientError::Encoding(
            "--fields must be a JSON object".into(),
        ))
    }
}

fn print_json(value: &Value, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    println!("{}", rendered.unwrap_or_else(|_| value.to_string()));
}

async fn watch(client: &Client, seconds: Option<u64>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
    client.set_notification_handler(move |notification| {
        let _ = tx.send(notification);
    });

    let deadline = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    };
    tokio::pin!(deadline);
    let mut state = client.subscribe_state();

    loop {
        tokio::select! {
            () = &mut deadline => break,
            changed = state.changed() => {
                if changed.is_err() || !client.is_connected() {
                    client.clear_notification_handler();
                    return Err(ClientError::Connection("connection lost while watching".into()));
                }
            }
            Some(notification) = rx.recv() => {
                let line = serde_json::json!({
                    "type": notification.kind,
                    "event": notification.event,
                    "data": notification.data,
                });
                print_json(&line, false);
            }
        }
    }

    client.clear_notification_handler();
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| ClientError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| ClientError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
