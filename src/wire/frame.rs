//! Frame model: outbound encoding and inbound classification.
//!
//! Every frame is one JSON object carrying a `type` discriminator. Outbound
//! frames always get a fresh `id`. Inbound frames are classified by
//! [`classify`] in a fixed priority order:
//!
//! | Step | Attempt                                  | Result                        |
//! |------|------------------------------------------|-------------------------------|
//! | 1    | decode as [`Response`], tag is known     | [`InboundFrame::Response`]    |
//! | 2    | decode as [`Notification`], tag is known | [`InboundFrame::Notification`]|
//! | 3    | *(anything else)*                        | [`InboundFrame::Unrecognized`]|
//!
//! Classification never fails and has no side effects, so a malformed
//! frame cannot disturb the reader loop.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::ProtocolConfig;
use crate::{ClientError, Result};

/// Closed sets of `type` values the reader recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSets {
    responses: BTreeSet<String>,
    notifications: BTreeSet<String>,
}

impl TagSets {
    /// Build tag sets from explicit lists.
    #[must_use]
    pub fn new<R, N>(responses: R, notifications: N) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            notifications: notifications.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `tag` marks a correlated response.
    #[must_use]
    pub fn is_response(&self, tag: &str) -> bool {
        self.responses.contains(tag)
    }

    /// Whether `tag` marks an unsolicited notification.
    #[must_use]
    pub fn is_notification(&self, tag: &str) -> bool {
        self.notifications.contains(tag)
    }
}

impl Default for TagSets {
    fn default() -> Self {
        Self::from(&ProtocolConfig::default())
    }
}

impl From<&ProtocolConfig> for TagSets {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            responses: config.response_tags.clone(),
            notifications: config.notification_tags.clone(),
        }
    }
}

/// A correlated response frame.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Response {
    /// Identifier of the request this answers.
    pub id: String,
    /// Response discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the server handled the request.
    #[serde(default)]
    pub success: bool,
    /// Result payload; `null` when absent.
    #[serde(default)]
    pub data: Value,
    /// Failure detail: a string, or an object carrying `message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    /// Human-readable failure message for an unsuccessful response.
    #[must_use]
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Object(obj)) => obj
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| Value::Object(obj.clone()).to_string(), str::to_owned),
            Some(Value::Null) | None => "request failed".to_owned(),
            Some(other) => other.to_string(),
        }
    }

    /// Convert into the caller-facing outcome for a request of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] when `success` is false.
    pub fn into_result(self, kind: &str) -> Result<Value> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ClientError::Remote {
                kind: kind.to_owned(),
                message: self.error_message(),
            })
        }
    }
}

/// An unsolicited server event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Notification {
    /// Notification discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event name; older servers send it as `action`.
    #[serde(default, alias = "action", skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Event payload; `null` when absent.
    #[serde(default)]
    pub data: Value,
}

/// Result of classifying one inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Matches a pending request by `id`.
    Response(Response),
    /// Routed to the notification sink.
    Notification(Notification),
    /// Neither; logged and skipped.
    Unrecognized {
        /// The `type` field, when one could be read.
        kind: Option<String>,
        /// Why the frame was not recognized.
        reason: String,
    },
}

/// Classify a single inbound line.
#[must_use]
pub fn classify(line: &str, tags: &TagSets) -> InboundFrame {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return InboundFrame::Unrecognized {
                kind: None,
                reason: format!("malformed json: {e}"),
            }
        }
    };

    let response_error = match Response::deserialize(&value) {
        Ok(response) if tags.is_response(&response.kind) => {
            return InboundFrame::Response(response)
        }
        Ok(_) => None,
        Err(e) => Some(e.to_string()),
    };

    if let Ok(notification) = Notification::deserialize(&value) {
        if tags.is_notification(&notification.kind) {
            return InboundFrame::Notification(notification);
        }
    }

    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    let reason = match &kind {
        Some(tag) if tags.is_response(tag) => format!(
            "response frame failed to decode: {}",
            response_error.unwrap_or_default()
        ),
        Some(tag) => format!("unknown frame type '{tag}'"),
        None => "frame has no string `type`".to_owned(),
    };
    InboundFrame::Unrecognized { kind, reason }
}

/// An encoded outbound frame, ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Fresh correlation identifier stamped into the frame.
    pub id: String,
    /// Discriminator stamped into the frame.
    pub kind: String,
    /// Compact JSON, without the trailing newline.
    pub line: String,
}

/// Generate a fresh correlation identifier.
#[must_use]
pub fn new_frame_id() -> String {
    Uuid::new_v4().to_string()
}

/// Encode `fields` as an outbound frame of type `kind`.
///
/// `fields` must serialize to a JSON object (or `null`, treated as empty).
/// Any `id` or `type` key it carries is overwritten.
///
/// # Errors
///
/// Returns [`ClientError::Encoding`] when `kind` is blank, when `fields`
/// cannot be serialized, or when it is not an object.
pub fn encode_outbound<T>(kind: &str, fields: &T) -> Result<OutboundFrame>
where
    T: Serialize + ?Sized,
{
    if kind.trim().is_empty() {
        return Err(ClientError::Encoding("frame type must not be empty".into()));
    }

    let mut map = match serde_json::to_value(fields)? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ClientError::Encoding(format!(
                "frame fields must be a JSON object, got {}",
                json_type_name(&other)
            )))
        }
    };

    let id = new_frame_id();
    map.insert("id".to_owned(), Value::String(id.clone()));
    map.insert("type".to_owned(), Value::String(kind.to_owned()));

    let line = serde_json::to_string(&Value::Object(map))?;
    Ok(OutboundFrame {
        id,
        kind: kind.to_owned(),
        line,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
