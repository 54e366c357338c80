//
// requests.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Building and sending requests to the kernel.

use bytes::Bytes;
use kshared::{
    jupyter_message::{JupyterChannel, JupyterMessage},
    wire_codec,
};
use serde_json::{json, Map, Value};

use crate::{callbacks::Callbacks, error::KernelError, events::KernelEvent};

use super::KernelClient;

impl KernelClient {
    /// Serialize and send a message without checking the outbound queue.
    async fn transmit(&mut self, msg: &JupyterMessage) -> Result<(), KernelError> {
        if !self.is_connected() {
            return Err(KernelError::NotConnected);
        }
        let frame = wire_codec::serialize(msg)?;
        self.transport.send(frame).await?;
        log::trace!(
            "[kernel {}] Sent {} ({}) on {}",
            self.log_id(),
            msg.msg_type(),
            msg.msg_id(),
            msg.channel
        );
        Ok(())
    }

    /// Send a message queued by a comm.
    pub(super) async fn transmit_outbound(&mut self, msg: JupyterMessage) {
        if msg.msg_type() == "comm_close" {
            if let Some(comm_id) = msg.content.get("comm_id").and_then(Value::as_str) {
                self.comms.forget(comm_id);
            }
        }
        if let Err(e) = self.transmit(&msg).await {
            log::warn!(
                "[kernel {}] Dropping queued {}: {}",
                self.log_id(),
                msg.msg_type(),
                e
            );
        }
    }

    /// Transmit everything comms have queued so far, in order.
    pub(super) async fn flush_outbound(&mut self) {
        while let Ok(queued) = self.outbound.try_recv() {
            self.transmit_outbound(queued).await;
        }
    }

    /// Send a message, after anything comms have already queued.
    async fn send_message(&mut self, msg: &JupyterMessage) -> Result<(), KernelError> {
        self.flush_outbound().await;
        self.transmit(msg).await
    }

    /// Send a request on the shell channel and register callbacks for its
    /// replies. Returns the request's message ID.
    pub async fn send_shell_message(
        &mut self,
        msg_type: &str,
        content: Value,
        callbacks: Callbacks,
        metadata: Option<Value>,
        buffers: Vec<Bytes>,
    ) -> Result<String, KernelError> {
        if !self.is_connected() {
            return Err(KernelError::NotConnected);
        }
        let msg = self
            .factory
            .build(msg_type, JupyterChannel::Shell, content, metadata, buffers);
        let msg_id = msg.msg_id().to_string();
        self.callbacks.register(&msg_id, callbacks);
        if let Err(e) = self.send_message(&msg).await {
            self.callbacks.clear(&msg_id);
            return Err(e);
        }
        Ok(msg_id)
    }

    /// Execute code.
    ///
    /// Runs silently without storing history unless `options` (merged
    /// over the defaults) says otherwise. `allow_stdin` is always true when
    /// an input callback is given.
    pub async fn execute(
        &mut self,
        code: &str,
        callbacks: Callbacks,
        options: Option<Map<String, Value>>,
    ) -> Result<String, KernelError> {
        let mut content = Map::new();
        content.insert(String::from("code"), json!(code));
        content.insert(String::from("silent"), json!(true));
        content.insert(String::from("store_history"), json!(false));
        content.insert(String::from("user_expressions"), json!({}));
        content.insert(String::from("allow_stdin"), json!(false));
        if let Some(options) = options {
            content.extend(options);
        }
        if callbacks.input.is_some() {
            content.insert(String::from("allow_stdin"), json!(true));
        }

        let content = Value::Object(content);
        if self.is_connected() {
            self.events.emit(KernelEvent::ExecutionRequest {
                content: content.clone(),
            });
        }
        self.send_shell_message("execute_request", content, callbacks, None, Vec::new())
            .await
    }

    /// Get introspection information about the object at `cursor_pos`.
    pub async fn inspect(
        &mut self,
        code: &str,
        cursor_pos: usize,
        callbacks: Callbacks,
    ) -> Result<String, KernelError> {
        let content = json!({
            "code": code,
            "cursor_pos": cursor_pos,
            "detail_level": 0,
        });
        self.send_shell_message("inspect_request", content, callbacks, None, Vec::new())
            .await
    }

    /// Get completions at `cursor_pos`.
    pub async fn complete(
        &mut self,
        code: &str,
        cursor_pos: usize,
        callbacks: Callbacks,
    ) -> Result<String, KernelError> {
        let content = json!({
            "code": code,
            "cursor_pos": cursor_pos,
        });
        self.send_shell_message("complete_request", content, callbacks, None, Vec::new())
            .await
    }

    /// Request the kernel's info.
    pub async fn kernel_info(&mut self, callbacks: Callbacks) -> Result<String, KernelError> {
        self.send_shell_message("kernel_info_request", json!({}), callbacks, None, Vec::new())
            .await
    }

    /// Request the kernel's info on the client's own behalf; the reply is
    /// stored and announced as [`KernelEvent::Ready`].
    pub(super) async fn request_kernel_info(&mut self) -> Result<String, KernelError> {
        let msg_id = self.kernel_info(Callbacks::new()).await?;
        self.info_requests.insert(msg_id.clone());
        Ok(msg_id)
    }

    /// Answer an `input_request` from the kernel.
    pub async fn send_input_reply(&mut self, value: &str) -> Result<String, KernelError> {
        if !self.is_connected() {
            return Err(KernelError::NotConnected);
        }
        let content = json!({ "value": value });
        self.events.emit(KernelEvent::InputReply {
            content: content.clone(),
        });
        let msg = self
            .factory
            .build("input_reply", JupyterChannel::Stdin, content, None, Vec::new());
        self.send_message(&msg).await?;
        Ok(msg.msg_id().to_string())
    }
}
