//
// config.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::path::Path;

use kshared::jupyter_message::DEFAULT_PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

use crate::reconnect::DEFAULT_RECONNECT_LIMIT;

/// Configuration for a kernel client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// The root URL of the Jupyter server's REST API
    pub base_url: String,

    /// The root URL for websocket connections. Derived from `base_url` when
    /// not set.
    pub ws_url: Option<String>,

    /// The kernel spec to start, e.g. "python3"
    pub kernel_name: String,

    /// The username placed in message headers
    pub username: String,

    /// How many reconnection attempts to make before declaring the
    /// connection dead
    pub reconnect_limit: u32,

    /// The Jupyter protocol version placed in message headers
    pub protocol_version: String,

    /// An optional API token, sent as `Authorization: token <value>`
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("http://localhost:8888"),
            ws_url: None,
            kernel_name: String::from("python3"),
            username: String::from("username"),
            reconnect_limit: DEFAULT_RECONNECT_LIMIT,
            protocol_version: String::from(DEFAULT_PROTOCOL_VERSION),
            token: None,
        }
    }
}

impl ClientConfig {
    /// Load a configuration from a JSON file. Missing fields take their
    /// default values.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        let config = serde_json::from_reader(file)?;
        Ok(config)
    }

    /// The websocket root; a trailing 's' in https becomes wss.
    pub fn websocket_base(&self) -> String {
        let base = match &self.ws_url {
            Some(url) => url.clone(),
            None => match self.base_url.strip_prefix("http") {
                Some(rest) => format!("ws{}", rest),
                None => self.base_url.clone(),
            },
        };
        base.trim_end_matches('/').to_string()
    }
}
