//
// events.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use kshared::{jupyter_message::JupyterMessage, kernel_info::KernelInfoReply};

/// Notifications the kernel client publishes to its observers (UI layers,
/// collaborators) about the kernel and the connection to it.
#[derive(Debug, Clone)]
pub enum KernelEvent {
    /// A kernel is being started (or reported that it is starting).
    Starting,

    /// The server created (or re-created) the kernel.
    Created { kernel_id: String },

    /// The websocket connection to the kernel opened.
    Connected,

    /// The kernel answered the post-connection kernel info request.
    Ready(Box<KernelInfoReply>),

    /// The websocket connection to the kernel closed.
    Disconnected,

    /// A reconnection attempt is starting.
    Reconnecting { attempt: u32 },

    /// The websocket connection failed with an error.
    ConnectionFailed { url: String, attempt: u32 },

    /// Reconnection attempts are exhausted. Terminal.
    ConnectionDead { attempt: u32 },

    /// The kernel is busy.
    Busy,

    /// The kernel is idle.
    Idle,

    /// The kernel is restarting.
    Restarting,

    /// The server is restarting the kernel after it died. Distinct from a
    /// user-requested restart; warrants a more prominent warning.
    Autorestarting { attempt: u32 },

    /// An interrupt was requested.
    Interrupting,

    /// The kernel was killed at the client's request.
    Killed,

    /// The kernel is dead. Terminal until an explicit restart.
    Dead,

    /// An execute request is about to be sent.
    ExecutionRequest { content: serde_json::Value },

    /// An input reply is about to be sent.
    InputReply { content: serde_json::Value },

    /// A shell reply arrived.
    ShellReply(Box<JupyterMessage>),

    /// A message arrived that no outstanding request of this client
    /// accounts for, e.g. output from another client of the same kernel.
    UnsolicitedMessage(Box<JupyterMessage>),

    /// A comm opened by the kernel could not be bound to a handler and was
    /// closed.
    CommOpenFailed {
        comm_id: String,
        target_name: String,
        error: String,
    },
}

/// Publishes events; sending never blocks and never fails the caller.
///
/// The channel is bounded. When observers fall behind, the oldest buffered
/// event is displaced, so the most recent events (including the terminal
/// `Dead` and `ConnectionDead`) are always delivered. Observers that only
/// need the current connection state can use
/// [`KernelClient::watch_state`](crate::KernelClient::watch_state) instead.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: async_channel::Sender<KernelEvent>,
}

impl EventSender {
    pub fn new(tx: async_channel::Sender<KernelEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: KernelEvent) {
        log::trace!("Kernel event: {:?}", event);
        match self.tx.force_send(event) {
            Ok(Some(displaced)) => {
                log::debug!("Event buffer full; dropped oldest event {:?}", displaced)
            }
            Ok(None) => {}
            Err(e) => log::debug!("Dropping kernel event (no listeners): {}", e),
        }
    }
}
