//! Replaceable callbacks: the notification sink and the log sink.
//!
//! Both run synchronously on whichever task raised the event; for
//! notifications that is the reader task, so handlers must hand long work off
//! themselves.

use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use crate::wire::Notification;

/// Callback invoked for every classified notification.
pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// Callback invoked for every client diagnostic.
pub type LogHandler = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Severity attached to a client diagnostic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Routine detail (discarded responses, dropped notifications).
    Debug,
    /// Lifecycle events (connect, close).
    Info,
    /// Recoverable protocol problems (unrecognized frames, lost connection).
    Warn,
    /// Handler or transport failures.
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Holds the current notification handler.
#[derive(Default)]
pub struct NotificationSink {
    handler: RwLock<Option<NotificationHandler>>,
}

impl NotificationSink {
    /// Replace the handler.
    pub fn set(&self, handler: NotificationHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Remove the handler; later notifications are dropped.
    pub fn clear(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Invoke the handler with `notification`.
    ///
    /// The handler is cloned out of the lock before it runs, so it may
    /// replace itself. A panic inside the handler is caught and reported to
    /// `log`; the caller keeps running.
    pub fn dispatch(&self, notification: Notification, log: &LogSink) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(handler) = handler else {
            log.emit(
                LogLevel::Debug,
                &format!(
                    "no notification handler installed, dropping '{}'",
                    notification.kind
                ),
            );
            return;
        };

        let kind = notification.kind.clone();
        if catch_unwind(AssertUnwindSafe(|| handler(notification))).is_err() {
            log.emit(
                LogLevel::Error,
                &format!("notification handler panicked on '{kind}'"),
            );
        }
    }
}

impl std::fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let installed = self
            .handler
            .read()
            .is_ok_and(|h| h.is_some());
        f.debug_struct("NotificationSink")
            .field("installed", &installed)
            .finish()
    }
}

/// Routes client diagnostics to `tracing` and to an optional handler.
#[derive(Default)]
pub struct LogSink {
    handler: RwLock<Option<LogHandler>>,
}

impl LogSink {
    /// Replace the handler.
    pub fn set(&self, handler: LogHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Remove the handler; diagnostics still reach `tracing`.
    pub fn clear(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Emit one diagnostic.
    pub fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(target: "muxlink", "{message}"),
            LogLevel::Info => info!(target: "muxlink", "{message}"),
            LogLevel::Warn => warn!(target: "muxlink", "{message}"),
            LogLevel::Error => error!(target: "muxlink", "{message}"),
        }

        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            // A broken log handler must not take the reader down with it.
            let _ = catch_unwind(AssertUnwindSafe(|| handler(level, message)));
        }
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let installed = self
            .handler
            .read()
            .is_ok_and(|h| h.is_some());
        f.debug_struct("LogSink")
            .field("installed", &installed)
            .finish()
    }
}
