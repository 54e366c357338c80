//
// callbacks.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Correlates replies and output with the request that caused them.

use std::collections::HashMap;
use std::fmt;

use kshared::jupyter_message::JupyterMessage;

use crate::error::KernelError;

/// Receives a message. Returning an error is logged and never interrupts
/// dispatch.
pub type MessageCallback = Box<dyn FnMut(&JupyterMessage) -> anyhow::Result<()> + Send>;

/// Receives one payload directive from a shell reply, along with the full
/// reply.
pub type PayloadCallback =
    Box<dyn FnMut(&serde_json::Value, &JupyterMessage) -> anyhow::Result<()> + Send>;

/// Callbacks for the shell reply to a request.
#[derive(Default)]
pub struct ShellCallbacks {
    pub reply: Option<MessageCallback>,

    /// Payload handlers, keyed by payload `source` (e.g. `set_next_input`,
    /// `page`)
    pub payload: HashMap<String, PayloadCallback>,
}

/// Callbacks for iopub messages caused by a request.
#[derive(Default)]
pub struct IopubCallbacks {
    pub status: Option<MessageCallback>,
    pub output: Option<MessageCallback>,
    pub clear_output: Option<MessageCallback>,
}

/// The callbacks a caller attaches to a request. All are optional.
#[derive(Default)]
pub struct Callbacks {
    pub shell: Option<ShellCallbacks>,
    pub iopub: Option<IopubCallbacks>,

    /// Called with `input_request` messages on the stdin channel
    pub input: Option<MessageCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_reply<F>(mut self, f: F) -> Self
    where
        F: FnMut(&JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.shell.get_or_insert_with(Default::default).reply = Some(Box::new(f));
        self
    }

    pub fn on_payload<F>(mut self, source: &str, f: F) -> Self
    where
        F: FnMut(&serde_json::Value, &JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.shell
            .get_or_insert_with(Default::default)
            .payload
            .insert(source.to_string(), Box::new(f));
        self
    }

    pub fn on_status<F>(mut self, f: F) -> Self
    where
        F: FnMut(&JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.iopub.get_or_insert_with(Default::default).status = Some(Box::new(f));
        self
    }

    pub fn on_output<F>(mut self, f: F) -> Self
    where
        F: FnMut(&JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.iopub.get_or_insert_with(Default::default).output = Some(Box::new(f));
        self
    }

    pub fn on_clear_output<F>(mut self, f: F) -> Self
    where
        F: FnMut(&JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.iopub.get_or_insert_with(Default::default).clear_output = Some(Box::new(f));
        self
    }

    pub fn on_input<F>(mut self, f: F) -> Self
    where
        F: FnMut(&JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.input = Some(Box::new(f));
        self
    }
}

/// The registry entry for one outstanding request.
pub struct CallbackSet {
    pub callbacks: Callbacks,

    /// Whether the shell reply has arrived
    pub shell_done: bool,

    /// Whether the kernel went idle for this request
    pub iopub_done: bool,
}

impl CallbackSet {
    pub fn reply(&mut self) -> Option<&mut MessageCallback> {
        self.callbacks.shell.as_mut()?.reply.as_mut()
    }

    pub fn payload(&mut self, source: &str) -> Option<&mut PayloadCallback> {
        self.callbacks.shell.as_mut()?.payload.get_mut(source)
    }

    pub fn status(&mut self) -> Option<&mut MessageCallback> {
        self.callbacks.iopub.as_mut()?.status.as_mut()
    }

    pub fn output(&mut self) -> Option<&mut MessageCallback> {
        self.callbacks.iopub.as_mut()?.output.as_mut()
    }

    pub fn clear_output(&mut self) -> Option<&mut MessageCallback> {
        self.callbacks.iopub.as_mut()?.clear_output.as_mut()
    }

    pub fn input(&mut self) -> Option<&mut MessageCallback> {
        self.callbacks.input.as_mut()
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("shell", &self.callbacks.shell.is_some())
            .field("iopub", &self.callbacks.iopub.is_some())
            .field("input", &self.callbacks.input.is_some())
            .field("shell_done", &self.shell_done)
            .field("iopub_done", &self.iopub_done)
            .finish()
    }
}

/// Maps outstanding request IDs to their callbacks.
///
/// A request produces one shell reply but an unbounded stream of iopub
/// messages that ends when the kernel reports idle for it. An entry lives
/// until both have been seen.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    entries: HashMap<String, CallbackSet>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, msg_id: &str, callbacks: Callbacks) {
        let set = CallbackSet {
            callbacks,
            shell_done: false,
            iopub_done: false,
        };
        if self.entries.insert(msg_id.to_string(), set).is_some() {
            log::warn!("Replacing callbacks for message {}", msg_id);
        }
    }

    pub fn get(&self, msg_id: &str) -> Option<&CallbackSet> {
        self.entries.get(msg_id)
    }

    pub fn get_mut(&mut self, msg_id: &str) -> Option<&mut CallbackSet> {
        self.entries.get_mut(msg_id)
    }

    pub fn contains(&self, msg_id: &str) -> bool {
        self.entries.contains_key(msg_id)
    }

    /// Record that the shell reply for `msg_id` arrived.
    pub fn finish_shell(&mut self, msg_id: &str) {
        if let Some(set) = self.entries.get_mut(msg_id) {
            set.shell_done = true;
            if set.iopub_done {
                self.clear(msg_id);
            }
        }
    }

    /// Record that the kernel went idle for `msg_id`.
    pub fn finish_iopub(&mut self, msg_id: &str) {
        if let Some(set) = self.entries.get_mut(msg_id) {
            set.iopub_done = true;
            if set.shell_done {
                self.clear(msg_id);
            }
        }
    }

    pub fn clear(&mut self, msg_id: &str) {
        if self.entries.remove(msg_id).is_some() {
            log::trace!("Cleared callbacks for message {}", msg_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Invoke a callback, logging (and swallowing) any error it returns.
pub(crate) fn invoke_callback(
    context: &str,
    callback: &mut MessageCallback,
    msg: &JupyterMessage,
) {
    if let Err(error) = callback(msg) {
        KernelError::HandlerException {
            context: context.to_string(),
            error,
        }
        .log();
    }
}
