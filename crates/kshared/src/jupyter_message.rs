//
// jupyter_message.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The Jupyter messaging protocol version spoken by default.
pub const DEFAULT_PROTOCOL_VERSION: &str = "5.0";

/// Generates a fresh, unique message ID.
pub fn make_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The header of a Jupyter message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JupyterMessageHeader {
    /// Unique per message; replies name it in their parent header
    #[serde(alias = "id")]
    pub msg_id: String,

    /// e.g. `execute_request`, `status`
    #[serde(alias = "type")]
    pub msg_type: String,

    /// Sender's username
    #[serde(default)]
    pub username: String,

    /// Sender's session; constant for the life of a client
    #[serde(default)]
    pub session: String,

    #[serde(default)]
    pub version: String,

    /// The date/time the message was created, as an ISO 8601 string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// The Jupyter channels ("sockets") a websocket-bridged message can travel
/// on.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JupyterChannel {
    /// Requests and their replies
    Shell,

    /// Out-of-band requests such as shutdown
    Control,

    /// Input requests from the kernel
    Stdin,

    /// Broadcast output and status
    IOPub,
}

impl std::fmt::Display for JupyterChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JupyterChannel::Shell => "shell",
            JupyterChannel::Control => "control",
            JupyterChannel::Stdin => "stdin",
            JupyterChannel::IOPub => "iopub",
        };
        f.write_str(name)
    }
}

/// A Jupyter message.
///
/// Binary attachments (`buffers`) are not part of the JSON body; the wire
/// codec carries them out of band.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JupyterMessage {
    pub header: JupyterMessageHeader,

    /// The header of the message's parent (the message that caused this
    /// message). Travels as `{}` when absent.
    #[serde(default, with = "parent_header")]
    pub parent_header: Option<JupyterMessageHeader>,

    /// Channel the message travels on
    pub channel: JupyterChannel,

    /// Type-specific body
    #[serde(default)]
    pub content: serde_json::Value,

    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,

    /// Binary attachments, in order
    #[serde(skip)]
    pub buffers: Vec<Bytes>,
}

impl JupyterMessage {
    /// The ID of this message.
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// The type of this message, e.g. `execute_reply`.
    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// The ID of the request that caused this message, if any.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|h| h.msg_id.as_str())
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Builds outgoing messages stamped with this client's identity.
#[derive(Debug, Clone)]
pub struct MessageFactory {
    /// The username placed in every header
    pub username: String,

    /// The client session ID placed in every header
    pub session: String,

    /// The protocol version placed in every header
    pub version: String,
}

impl MessageFactory {
    pub fn new(username: String, session: String, version: String) -> Self {
        Self {
            username,
            session,
            version,
        }
    }

    /// Build a message with a freshly generated ID and an empty parent
    /// header.
    pub fn build(
        &self,
        msg_type: &str,
        channel: JupyterChannel,
        content: serde_json::Value,
        metadata: Option<serde_json::Value>,
        buffers: Vec<Bytes>,
    ) -> JupyterMessage {
        // Create an ISO 8601 date string
        let date = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        JupyterMessage {
            header: JupyterMessageHeader {
                msg_id: make_message_id(),
                msg_type: msg_type.to_string(),
                username: self.username.clone(),
                session: self.session.clone(),
                version: self.version.clone(),
                date: Some(date),
            },
            parent_header: None,
            channel,
            content,
            metadata: metadata.unwrap_or_else(empty_object),
            buffers,
        }
    }
}

/// (De)serializes an optional parent header, using `{}` for "no parent".
mod parent_header {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::JupyterMessageHeader;

    pub fn serialize<S: Serializer>(
        value: &Option<JupyterMessageHeader>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(header) => header.serialize(serializer),
            None => serde_json::Map::new().serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<JupyterMessageHeader>, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Object(map)) if map.is_empty() => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
