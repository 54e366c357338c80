//
// kernel_state.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::fmt;

/// The state of the client's connection to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection is open. A reconnection attempt may be scheduled.
    Disconnected,

    /// A connection is being opened.
    Connecting,

    /// The connection is open and messages can be exchanged.
    Connected,

    /// The connection is permanently lost. No further automatic recovery is
    /// attempted; the kernel must be explicitly restarted.
    Dead,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Dead => "dead",
        };
        f.write_str(name)
    }
}
