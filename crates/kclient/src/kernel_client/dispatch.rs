//
// dispatch.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Routing of inbound messages to callbacks, by channel and message type.

use kshared::{
    jupyter_message::{JupyterChannel, JupyterMessage},
    kernel_info::KernelInfoReply,
    kernel_status::{ExecutionState, StatusContent},
    wire_codec::{self, WireFrame},
};
use serde_json::Value;

use crate::{
    callbacks::invoke_callback,
    error::KernelError,
    events::KernelEvent,
};

use super::{BuiltinIopub, IopubHandler, KernelClient};

impl KernelClient {
    /// Decode a frame and dispatch it. Frames that cannot be decoded are
    /// logged and dropped.
    pub(super) async fn handle_frame(&mut self, frame: WireFrame) {
        let msg = match wire_codec::deserialize(frame) {
            Ok(msg) => msg,
            Err(e) => {
                KernelError::from(e).log();
                return;
            }
        };
        log::trace!(
            "[kernel {}] Received {} on {}",
            self.log_id(),
            msg.msg_type(),
            msg.channel
        );
        match msg.channel {
            JupyterChannel::Shell => self.handle_shell_reply(msg),
            JupyterChannel::IOPub => self.handle_iopub_message(msg).await,
            JupyterChannel::Stdin => self.handle_stdin_message(msg),
            JupyterChannel::Control => {
                log::debug!(
                    "[kernel {}] Ignoring {} on the control channel",
                    self.log_id(),
                    msg.msg_type()
                );
            }
        }
    }

    fn unsolicited(&self, msg: JupyterMessage) {
        log::debug!(
            "[kernel {}] Unsolicited {} (parent {:?})",
            self.log_id(),
            msg.msg_type(),
            msg.parent_id()
        );
        self.events
            .emit(KernelEvent::UnsolicitedMessage(Box::new(msg)));
    }

    fn handle_shell_reply(&mut self, msg: JupyterMessage) {
        self.events
            .emit(KernelEvent::ShellReply(Box::new(msg.clone())));

        let Some(parent_id) = msg.parent_id().map(str::to_string) else {
            self.unsolicited(msg);
            return;
        };

        if self.info_requests.remove(&parent_id) {
            self.handle_info_reply(&msg);
        }

        let Some(set) = self.callbacks.get_mut(&parent_id) else {
            self.unsolicited(msg);
            return;
        };

        if let Some(reply) = set.reply() {
            invoke_callback("shell reply", reply, &msg);
        }

        // Hand each payload directive to the handler registered for its
        // source, in order
        if let Some(payloads) = msg.content.get("payload").and_then(Value::as_array) {
            for payload in payloads {
                let Some(source) = payload.get("source").and_then(Value::as_str) else {
                    continue;
                };
                if let Some(handler) = set.payload(source) {
                    if let Err(error) = handler(payload, &msg) {
                        KernelError::HandlerException {
                            context: format!("payload '{}'", source),
                            error,
                        }
                        .log();
                    }
                }
            }
        }

        self.callbacks.finish_shell(&parent_id);
    }

    /// Store the reply to a kernel info request this client made itself.
    fn handle_info_reply(&mut self, msg: &JupyterMessage) {
        match serde_json::from_value::<KernelInfoReply>(msg.content.clone()) {
            Ok(info) => {
                log::info!(
                    "[kernel {}] Kernel ready: {}, protocol {}",
                    self.log_id(),
                    info.summary(),
                    info.protocol_version
                );
                self.autorestart_attempt = 0;
                self.restarting = false;
                self.info_reply = Some(info.clone());
                self.events.emit(KernelEvent::Ready(Box::new(info)));
            }
            Err(e) => {
                KernelError::MalformedMessage(format!("kernel_info_reply: {}", e)).log();
            }
        }
    }

    async fn handle_iopub_message(&mut self, msg: JupyterMessage) {
        let builtin = match self.iopub_handlers.get_mut(msg.msg_type()) {
            Some(IopubHandler::Custom(handler)) => {
                invoke_callback(msg.msg_type(), handler, &msg);
                return;
            }
            Some(IopubHandler::Builtin(builtin)) => *builtin,
            None => {
                log::debug!(
                    "[kernel {}] No handler for iopub message type {}",
                    self.log_id(),
                    msg.msg_type()
                );
                return;
            }
        };

        match builtin {
            BuiltinIopub::Status => self.handle_status(&msg).await,
            BuiltinIopub::ClearOutput => self.handle_clear_output(&msg),
            BuiltinIopub::ExecuteInput => self.handle_execute_input(msg),
            BuiltinIopub::Output => self.handle_output(msg),
            BuiltinIopub::CommOpen => self.comms.comm_open(&msg),
            BuiltinIopub::CommMsg => self.comms.comm_msg(&msg),
            BuiltinIopub::CommClose => self.comms.comm_close(&msg),
        }
    }

    async fn handle_status(&mut self, msg: &JupyterMessage) {
        let status = match serde_json::from_value::<StatusContent>(msg.content.clone()) {
            Ok(status) => status.execution_state,
            Err(e) => {
                KernelError::MalformedMessage(format!("status: {}", e)).log();
                return;
            }
        };
        self.execution_state = status;

        let parent_id = msg.parent_id();
        if let Some(set) = parent_id.and_then(|id| self.callbacks.get_mut(id)) {
            if let Some(callback) = set.status() {
                invoke_callback("status", callback, msg);
            }
        }

        match status {
            ExecutionState::Busy => self.events.emit(KernelEvent::Busy),
            ExecutionState::Idle => {
                self.events.emit(KernelEvent::Idle);
                if let Some(parent_id) = parent_id {
                    self.callbacks.finish_iopub(parent_id);
                }
            }
            ExecutionState::Starting => {
                self.events.emit(KernelEvent::Starting);
                if let Err(e) = self.request_kernel_info().await {
                    log::warn!(
                        "[kernel {}] Could not request kernel info after start: {}",
                        self.log_id(),
                        e
                    );
                }
            }
            ExecutionState::Restarting => {
                self.events.emit(KernelEvent::Restarting);
                if !self.restarting {
                    // Not requested by us; the server is restarting a kernel
                    // that died
                    self.autorestart_attempt += 1;
                    log::warn!(
                        "[kernel {}] Kernel is autorestarting (attempt {})",
                        self.log_id(),
                        self.autorestart_attempt
                    );
                    self.events.emit(KernelEvent::Autorestarting {
                        attempt: self.autorestart_attempt,
                    });
                }
            }
            ExecutionState::Dead => {
                log::error!("[kernel {}] Kernel reported that it died", self.log_id());
                self.kernel_dead().await;
            }
            ExecutionState::Unknown => {
                log::debug!(
                    "[kernel {}] Unrecognized execution state: {}",
                    self.log_id(),
                    msg.content["execution_state"]
                );
            }
        }
    }

    fn handle_clear_output(&mut self, msg: &JupyterMessage) {
        let callback = msg
            .parent_id()
            .and_then(|id| self.callbacks.get_mut(id))
            .and_then(|set| set.clear_output());
        match callback {
            Some(callback) => invoke_callback("clear_output", callback, msg),
            None => log::trace!("[kernel {}] Dropping clear_output", self.log_id()),
        }
    }

    fn handle_execute_input(&mut self, msg: JupyterMessage) {
        let known = msg
            .parent_id()
            .is_some_and(|id| self.callbacks.contains(id));
        if !known {
            // Code executed on behalf of another client
            self.unsolicited(msg);
        }
    }

    fn handle_output(&mut self, msg: JupyterMessage) {
        let callback = msg
            .parent_id()
            .and_then(|id| self.callbacks.get_mut(id))
            .and_then(|set| set.output());
        match callback {
            Some(callback) => invoke_callback("output", callback, &msg),
            None => self.unsolicited(msg),
        }
    }

    fn handle_stdin_message(&mut self, msg: JupyterMessage) {
        if msg.msg_type() != "input_request" {
            log::debug!(
                "[kernel {}] Ignoring {} on the stdin channel",
                self.log_id(),
                msg.msg_type()
            );
            return;
        }
        let callback = msg
            .parent_id()
            .and_then(|id| self.callbacks.get_mut(id))
            .and_then(|set| set.input());
        match callback {
            Some(callback) => invoke_callback("input", callback, &msg),
            None => self.unsolicited(msg),
        }
    }
}
