//
// comm.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Comms: named, bidirectional sub-channels multiplexed over the kernel
//! connection.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use kshared::jupyter_message::{make_message_id, JupyterChannel, JupyterMessage, MessageFactory};
use serde_json::Value;
use tokio::sync::watch;

use crate::callbacks::MessageCallback;
use crate::error::KernelError;
use crate::events::{EventSender, KernelEvent};
use crate::kernel_state::ConnectionState;

/// Handles a comm opened by the kernel. Receives the new comm (to attach
/// callbacks to) and the `comm_open` message.
pub type CommTargetFn =
    Arc<dyn Fn(&mut Comm, &JupyterMessage) -> anyhow::Result<()> + Send + Sync>;

/// Resolves comm targets that have not been registered up front, e.g. by
/// loading them on demand.
#[async_trait]
pub trait TargetLoader: Send + Sync + fmt::Debug {
    async fn load(
        &self,
        target_name: &str,
        target_module: Option<&str>,
    ) -> anyhow::Result<CommTargetFn>;
}

/// Sends comm messages on behalf of comms.
///
/// Messages are queued for the kernel client to transmit; sending fails
/// with [`KernelError::NotConnected`] unless the client is connected.
#[derive(Debug, Clone)]
pub struct CommSender {
    factory: MessageFactory,
    outbound: async_channel::Sender<JupyterMessage>,
    state: watch::Receiver<ConnectionState>,
}

impl CommSender {
    pub fn new(
        factory: MessageFactory,
        outbound: async_channel::Sender<JupyterMessage>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            factory,
            outbound,
            state,
        }
    }

    fn send(
        &self,
        msg_type: &str,
        content: Value,
        metadata: Option<Value>,
        buffers: Vec<Bytes>,
    ) -> Result<String, KernelError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(KernelError::NotConnected);
        }
        let msg = self
            .factory
            .build(msg_type, JupyterChannel::Shell, content, metadata, buffers);
        let msg_id = msg.header.msg_id.clone();
        self.outbound
            .try_send(msg)
            .map_err(|_| KernelError::NotConnected)?;
        Ok(msg_id)
    }
}

/// A cloneable handle for sending on a comm.
#[derive(Debug, Clone)]
pub struct CommHandle {
    comm_id: String,
    target_name: String,
    sender: CommSender,
}

impl CommHandle {
    pub fn comm_id(&self) -> &str {
        &self.comm_id
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Send `comm_open`. Returns the ID of the message sent.
    pub fn open(&self, data: Option<Value>, metadata: Option<Value>) -> Result<String, KernelError> {
        let content = serde_json::json!({
            "comm_id": self.comm_id,
            "target_name": self.target_name,
            "data": data.unwrap_or_else(|| serde_json::json!({})),
        });
        self.sender.send("comm_open", content, metadata, Vec::new())
    }

    /// Send `comm_msg`. Returns the ID of the message sent.
    pub fn send(
        &self,
        data: Option<Value>,
        metadata: Option<Value>,
        buffers: Vec<Bytes>,
    ) -> Result<String, KernelError> {
        let content = serde_json::json!({
            "comm_id": self.comm_id,
            "data": data.unwrap_or_else(|| serde_json::json!({})),
        });
        self.sender.send("comm_msg", content, metadata, buffers)
    }

    /// Send `comm_close`. The comm is unregistered once the message is
    /// transmitted.
    pub fn close(&self, data: Option<Value>, metadata: Option<Value>) -> Result<String, KernelError> {
        let content = serde_json::json!({
            "comm_id": self.comm_id,
            "data": data.unwrap_or_else(|| serde_json::json!({})),
        });
        self.sender.send("comm_close", content, metadata, Vec::new())
    }
}

/// One end of a comm.
pub struct Comm {
    handle: CommHandle,
    on_msg: Option<MessageCallback>,
    on_close: Option<MessageCallback>,
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm")
            .field("comm_id", &self.handle.comm_id)
            .field("target_name", &self.handle.target_name)
            .finish()
    }
}

impl Comm {
    fn new(comm_id: String, target_name: String, sender: CommSender) -> Self {
        Self {
            handle: CommHandle {
                comm_id,
                target_name,
                sender,
            },
            on_msg: None,
            on_close: None,
        }
    }

    pub fn comm_id(&self) -> &str {
        &self.handle.comm_id
    }

    pub fn target_name(&self) -> &str {
        &self.handle.target_name
    }

    /// A handle for sending on this comm from elsewhere.
    pub fn handle(&self) -> CommHandle {
        self.handle.clone()
    }

    /// Set the callback for `comm_msg` messages from the kernel.
    pub fn on_msg<F>(&mut self, f: F)
    where
        F: FnMut(&JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.on_msg = Some(Box::new(f));
    }

    /// Set the callback for `comm_close` from the kernel.
    pub fn on_close<F>(&mut self, f: F)
    where
        F: FnMut(&JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.on_close = Some(Box::new(f));
    }

    pub fn send(
        &self,
        data: Option<Value>,
        metadata: Option<Value>,
        buffers: Vec<Bytes>,
    ) -> Result<String, KernelError> {
        self.handle.send(data, metadata, buffers)
    }

    pub fn close(&self, data: Option<Value>, metadata: Option<Value>) -> Result<String, KernelError> {
        self.handle.close(data, metadata)
    }

    fn handle_msg(&mut self, msg: &JupyterMessage) {
        if let Some(callback) = self.on_msg.as_mut() {
            if let Err(error) = callback(msg) {
                KernelError::HandlerException {
                    context: format!("comm {} message", self.handle.comm_id),
                    error,
                }
                .log();
            }
        }
    }

    fn handle_close(&mut self, msg: &JupyterMessage) {
        if let Some(callback) = self.on_close.as_mut() {
            if let Err(error) = callback(msg) {
                KernelError::HandlerException {
                    context: format!("comm {} close", self.handle.comm_id),
                    error,
                }
                .log();
            }
        }
    }
}

/// An operation that arrived while a comm's target was still resolving.
#[derive(Debug)]
enum QueuedOp {
    Msg(JupyterMessage),
    Close(JupyterMessage),
}

#[derive(Debug)]
enum CommSlot {
    /// The target handler is being resolved. Operations for this comm wait
    /// in `queue` and are replayed in order once it resolves.
    Pending {
        target_name: String,
        open_msg: JupyterMessage,
        queue: VecDeque<QueuedOp>,
    },

    Ready(Comm),
}

struct Resolution {
    comm_id: String,

    /// ID of the `comm_open` that started the resolution
    open_id: String,
    result: anyhow::Result<CommTargetFn>,
}

/// Owns all comms on a kernel connection, keyed by comm ID.
pub struct CommManager {
    sender: CommSender,
    targets: HashMap<String, CommTargetFn>,
    loader: Option<Arc<dyn TargetLoader>>,
    comms: HashMap<String, CommSlot>,
    pending: FuturesUnordered<BoxFuture<'static, Resolution>>,
    events: EventSender,
}

impl fmt::Debug for CommManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommManager")
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .field("loader", &self.loader)
            .field("comms", &self.comms)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Read a string field from a comm message's content.
fn content_str<'a>(msg: &'a JupyterMessage, field: &str) -> Option<&'a str> {
    msg.content.get(field).and_then(Value::as_str)
}

impl CommManager {
    pub fn new(sender: CommSender, events: EventSender) -> Self {
        Self {
            sender,
            targets: HashMap::new(),
            loader: None,
            comms: HashMap::new(),
            pending: FuturesUnordered::new(),
            events,
        }
    }

    /// Open a comm from this side. The comm is registered and usable for
    /// sending immediately; the kernel's acknowledgement is not awaited.
    /// Attach callbacks through [`CommManager::comm_mut`].
    pub fn new_comm(
        &mut self,
        target_name: &str,
        data: Option<Value>,
        metadata: Option<Value>,
    ) -> Result<CommHandle, KernelError> {
        let comm = Comm::new(make_message_id(), target_name.to_string(), self.sender.clone());
        comm.handle.open(data, metadata)?;
        log::debug!(
            "[comm {}] Opened comm for target '{}'",
            comm.comm_id(),
            target_name
        );
        let handle = comm.handle();
        self.comms
            .insert(handle.comm_id.clone(), CommSlot::Ready(comm));
        Ok(handle)
    }

    /// Register the handler for comms the kernel opens with `target_name`.
    pub fn register_target<F>(&mut self, target_name: &str, f: F)
    where
        F: Fn(&mut Comm, &JupyterMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.targets.insert(target_name.to_string(), Arc::new(f));
    }

    /// Returns whether a handler was registered.
    pub fn unregister_target(&mut self, target_name: &str) -> bool {
        self.targets.remove(target_name).is_some()
    }

    /// Set the fallback used for targets with no registered handler.
    pub fn set_target_loader(&mut self, loader: Arc<dyn TargetLoader>) {
        self.loader = Some(loader);
    }

    /// Get a ready comm by ID.
    pub fn comm_mut(&mut self, comm_id: &str) -> Option<&mut Comm> {
        match self.comms.get_mut(comm_id) {
            Some(CommSlot::Ready(comm)) => Some(comm),
            _ => None,
        }
    }

    /// Whether a comm with this ID is registered (ready or resolving).
    pub fn contains(&self, comm_id: &str) -> bool {
        self.comms.contains_key(comm_id)
    }

    pub fn len(&self) -> usize {
        self.comms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comms.is_empty()
    }

    /// Whether any target resolution is outstanding.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Handle `comm_open` from the kernel.
    pub fn comm_open(&mut self, msg: &JupyterMessage) {
        let (Some(comm_id), Some(target_name)) =
            (content_str(msg, "comm_id"), content_str(msg, "target_name"))
        else {
            KernelError::MalformedMessage(String::from("comm_open without comm_id or target_name"))
                .log();
            return;
        };
        let comm_id = comm_id.to_string();
        let target_name = target_name.to_string();

        if self.comms.remove(&comm_id).is_some() {
            log::warn!("[comm {}] Replacing existing comm", comm_id);
        }

        if let Some(target) = self.targets.get(&target_name).cloned() {
            self.bind(comm_id, target_name, target, msg, VecDeque::new());
            return;
        }

        let Some(loader) = self.loader.clone() else {
            self.fail_open(
                &comm_id,
                &target_name,
                format!("No handler registered for target '{}'", target_name),
            );
            return;
        };

        log::debug!("[comm {}] Resolving target '{}'", comm_id, target_name);
        let module = content_str(msg, "target_module").map(str::to_string);
        let name = target_name.clone();
        let id = comm_id.clone();
        let open_id = msg.msg_id().to_string();
        self.pending.push(Box::pin(async move {
            let result = loader.load(&name, module.as_deref()).await;
            Resolution {
                comm_id: id,
                open_id,
                result,
            }
        }));
        self.comms.insert(
            comm_id,
            CommSlot::Pending {
                target_name,
                open_msg: msg.clone(),
                queue: VecDeque::new(),
            },
        );
    }

    /// Handle `comm_msg` from the kernel.
    pub fn comm_msg(&mut self, msg: &JupyterMessage) {
        let Some(comm_id) = content_str(msg, "comm_id") else {
            KernelError::MalformedMessage(String::from("comm_msg without comm_id")).log();
            return;
        };
        match self.comms.get_mut(comm_id) {
            Some(CommSlot::Ready(comm)) => comm.handle_msg(msg),
            Some(CommSlot::Pending { queue, .. }) => queue.push_back(QueuedOp::Msg(msg.clone())),
            None => log::warn!("[comm {}] Message for unknown comm; dropping", comm_id),
        }
    }

    /// Handle `comm_close` from the kernel.
    pub fn comm_close(&mut self, msg: &JupyterMessage) {
        let Some(comm_id) = content_str(msg, "comm_id") else {
            KernelError::MalformedMessage(String::from("comm_close without comm_id")).log();
            return;
        };
        if let Some(CommSlot::Pending { queue, .. }) = self.comms.get_mut(comm_id) {
            queue.push_back(QueuedOp::Close(msg.clone()));
            return;
        }
        match self.comms.remove(comm_id) {
            Some(CommSlot::Ready(mut comm)) => {
                log::debug!("[comm {}] Closed by kernel", comm_id);
                comm.handle_close(msg);
            }
            _ => log::warn!("[comm {}] Close for unknown comm; dropping", comm_id),
        }
    }

    /// Forget a comm closed from this side.
    pub fn forget(&mut self, comm_id: &str) {
        if self.comms.remove(comm_id).is_some() {
            log::debug!("[comm {}] Closed locally", comm_id);
        }
    }

    /// Wait for one outstanding target resolution and finish opening its
    /// comm, replaying any operations that queued up behind it. Returns
    /// false if nothing was pending.
    pub async fn next_resolution(&mut self) -> bool {
        match self.pending.next().await {
            Some(resolution) => {
                self.complete(resolution);
                true
            }
            None => false,
        }
    }

    fn complete(&mut self, resolution: Resolution) {
        let Resolution {
            comm_id,
            open_id,
            result,
        } = resolution;

        // The comm may have been replaced by a later open, or forgotten,
        // while this resolution ran
        let current = matches!(
            self.comms.get(&comm_id),
            Some(CommSlot::Pending { open_msg, .. }) if open_msg.msg_id() == open_id
        );
        if !current {
            log::debug!("[comm {}] Discarding stale target resolution", comm_id);
            return;
        }
        let Some(CommSlot::Pending {
            target_name,
            open_msg,
            queue,
        }) = self.comms.remove(&comm_id)
        else {
            return;
        };
        match result {
            Ok(target) => self.bind(comm_id, target_name, target, &open_msg, queue),
            Err(e) => self.fail_open(&comm_id, &target_name, format!("{:#}", e)),
        }
    }

    /// Create the comm, run the target handler, then replay queued
    /// operations in arrival order.
    fn bind(
        &mut self,
        comm_id: String,
        target_name: String,
        target: CommTargetFn,
        open_msg: &JupyterMessage,
        mut queue: VecDeque<QueuedOp>,
    ) {
        let mut comm = Comm::new(comm_id.clone(), target_name.clone(), self.sender.clone());
        if let Err(e) = target(&mut comm, open_msg) {
            self.fail_open(&comm_id, &target_name, format!("{:#}", e));
            return;
        }
        log::debug!("[comm {}] Opened by kernel for target '{}'", comm_id, target_name);

        while let Some(op) = queue.pop_front() {
            match op {
                QueuedOp::Msg(msg) => comm.handle_msg(&msg),
                QueuedOp::Close(msg) => {
                    comm.handle_close(&msg);
                    if !queue.is_empty() {
                        log::warn!(
                            "[comm {}] Dropping {} operation(s) queued after close",
                            comm_id,
                            queue.len()
                        );
                    }
                    return;
                }
            }
        }
        self.comms.insert(comm_id, CommSlot::Ready(comm));
    }

    /// Close and unregister a comm whose target could not be bound.
    fn fail_open(&mut self, comm_id: &str, target_name: &str, reason: String) {
        let error = KernelError::TargetResolutionFailed {
            comm_id: comm_id.to_string(),
            target_name: target_name.to_string(),
            reason,
        };
        error.log();

        let handle = CommHandle {
            comm_id: comm_id.to_string(),
            target_name: target_name.to_string(),
            sender: self.sender.clone(),
        };
        if let Err(e) = handle.close(None, None) {
            log::debug!("[comm {}] Could not send comm_close: {}", comm_id, e);
        }
        self.comms.remove(comm_id);
        self.events.emit(KernelEvent::CommOpenFailed {
            comm_id: comm_id.to_string(),
            target_name: target_name.to_string(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;

    struct Fixture {
        manager: CommManager,
        outbound: async_channel::Receiver<JupyterMessage>,
        events: async_channel::Receiver<KernelEvent>,
        state: watch::Sender<ConnectionState>,
    }

    fn fixture() -> Fixture {
        let factory = MessageFactory::new(
            String::from("test"),
            String::from("session"),
            String::from("5.3"),
        );
        let (out_tx, out_rx) = async_channel::unbounded();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (event_tx, event_rx) = async_channel::unbounded();
        Fixture {
            manager: CommManager::new(
                CommSender::new(factory, out_tx, state_rx),
                EventSender::new(event_tx),
            ),
            outbound: out_rx,
            events: event_rx,
            state: state_tx,
        }
    }

    fn kernel_msg(msg_type: &str, content: Value) -> JupyterMessage {
        let factory = MessageFactory::new(
            String::from("kernel"),
            String::from("kernel-session"),
            String::from("5.3"),
        );
        factory.build(msg_type, JupyterChannel::IOPub, content, None, Vec::new())
    }

    /// A target that records the `n` field of every comm_msg it receives.
    fn recording_target(seen: Arc<Mutex<Vec<i64>>>) -> CommTargetFn {
        Arc::new(move |comm: &mut Comm, _open: &JupyterMessage| {
            let seen = seen.clone();
            comm.on_msg(move |msg| {
                let n = msg.content["data"]["n"].as_i64().unwrap_or(-1);
                seen.lock().unwrap().push(n);
                Ok(())
            });
            Ok(())
        })
    }

    #[derive(Debug)]
    struct GatedLoader {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        seen: Arc<Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl TargetLoader for GatedLoader {
        async fn load(
            &self,
            _target_name: &str,
            _target_module: Option<&str>,
        ) -> anyhow::Result<CommTargetFn> {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.await?;
            }
            Ok(recording_target(self.seen.clone()))
        }
    }

    #[test]
    fn open_for_unknown_target_closes_the_comm() {
        let mut fx = fixture();
        let opened = Arc::new(Mutex::new(false));
        let flag = opened.clone();
        fx.manager.register_target("bar", move |_, _| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        fx.manager.comm_open(&kernel_msg(
            "comm_open",
            json!({"comm_id": "c1", "target_name": "foo", "data": {}}),
        ));

        assert!(!fx.manager.contains("c1"));
        assert!(!*opened.lock().unwrap());
        let close = fx.outbound.try_recv().unwrap();
        assert_eq!(close.msg_type(), "comm_close");
        assert_eq!(close.content["comm_id"], "c1");
        assert!(matches!(
            fx.events.try_recv().unwrap(),
            KernelEvent::CommOpenFailed { comm_id, target_name, .. }
                if comm_id == "c1" && target_name == "foo"
        ));
    }

    #[test]
    fn failing_target_handler_unregisters_the_comm() {
        let mut fx = fixture();
        fx.manager
            .register_target("flaky", |_, _| Err(anyhow::anyhow!("widget exploded")));

        fx.manager.comm_open(&kernel_msg(
            "comm_open",
            json!({"comm_id": "c2", "target_name": "flaky"}),
        ));

        assert!(fx.manager.is_empty());
        assert_eq!(fx.outbound.try_recv().unwrap().msg_type(), "comm_close");
    }

    #[tokio::test]
    async fn messages_queued_behind_resolution_arrive_in_order() {
        let mut fx = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = oneshot::channel();
        fx.manager.set_target_loader(Arc::new(GatedLoader {
            gate: Mutex::new(Some(gate)),
            seen: seen.clone(),
        }));

        fx.manager.comm_open(&kernel_msg(
            "comm_open",
            json!({"comm_id": "c3", "target_name": "lazy", "target_module": "widgets"}),
        ));
        for n in [1, 2] {
            fx.manager.comm_msg(&kernel_msg(
                "comm_msg",
                json!({"comm_id": "c3", "data": {"n": n}}),
            ));
        }
        assert!(fx.manager.has_pending());
        assert!(fx.manager.comm_mut("c3").is_none());
        assert!(seen.lock().unwrap().is_empty());

        release.send(()).unwrap();
        assert!(fx.manager.next_resolution().await);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert!(fx.manager.comm_mut("c3").is_some());
        assert!(!fx.manager.has_pending());
    }

    #[test]
    fn kernel_close_runs_callback_and_unregisters() {
        let mut fx = fixture();
        let closed = Arc::new(Mutex::new(0));
        let count = closed.clone();
        fx.manager.register_target("echo", move |comm, _| {
            let count = count.clone();
            comm.on_close(move |_| {
                *count.lock().unwrap() += 1;
                Ok(())
            });
            Ok(())
        });

        fx.manager.comm_open(&kernel_msg(
            "comm_open",
            json!({"comm_id": "c4", "target_name": "echo"}),
        ));
        assert!(fx.manager.contains("c4"));
        fx.manager
            .comm_close(&kernel_msg("comm_close", json!({"comm_id": "c4"})));

        assert_eq!(*closed.lock().unwrap(), 1);
        assert!(!fx.manager.contains("c4"));
    }

    #[test]
    fn new_comm_requires_a_connection() {
        let mut fx = fixture();
        let handle = fx.manager.new_comm("jupyter.widget", None, None).unwrap();
        let open = fx.outbound.try_recv().unwrap();
        assert_eq!(open.msg_type(), "comm_open");
        assert_eq!(open.content["comm_id"], handle.comm_id());
        assert_eq!(open.content["data"], json!({}));
        assert!(fx.manager.contains(handle.comm_id()));

        fx.state.send_replace(ConnectionState::Disconnected);
        assert!(matches!(
            fx.manager.new_comm("jupyter.widget", None, None),
            Err(KernelError::NotConnected)
        ));
        assert!(matches!(
            handle.send(Some(json!({"x": 1})), None, Vec::new()),
            Err(KernelError::NotConnected)
        ));
    }

    /// Resolves "slow" only once released; anything else at once. The
    /// bound handler records its target name, then each message as
    /// `target:n`.
    #[derive(Debug)]
    struct NamedLoader {
        slow_gate: Mutex<Option<oneshot::Receiver<()>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TargetLoader for NamedLoader {
        async fn load(
            &self,
            target_name: &str,
            _target_module: Option<&str>,
        ) -> anyhow::Result<CommTargetFn> {
            if target_name == "slow" {
                let gate = self.slow_gate.lock().unwrap().take();
                if let Some(gate) = gate {
                    gate.await?;
                }
            }
            let name = target_name.to_string();
            let calls = self.calls.clone();
            Ok(Arc::new(move |comm: &mut Comm, _open: &JupyterMessage| {
                calls.lock().unwrap().push(name.clone());
                let (name, calls) = (name.clone(), calls.clone());
                comm.on_msg(move |msg| {
                    let n = msg.content["data"]["n"].as_i64().unwrap_or(-1);
                    calls.lock().unwrap().push(format!("{}:{}", name, n));
                    Ok(())
                });
                Ok(())
            }))
        }
    }

    #[tokio::test]
    async fn reopen_while_resolving_binds_the_latest_target() {
        let mut fx = fixture();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = oneshot::channel();
        fx.manager.set_target_loader(Arc::new(NamedLoader {
            slow_gate: Mutex::new(Some(gate)),
            calls: calls.clone(),
        }));

        fx.manager.comm_open(&kernel_msg(
            "comm_open",
            json!({"comm_id": "d", "target_name": "fast"}),
        ));
        fx.manager.comm_open(&kernel_msg(
            "comm_open",
            json!({"comm_id": "d", "target_name": "slow"}),
        ));
        fx.manager
            .comm_msg(&kernel_msg("comm_msg", json!({"comm_id": "d", "data": {"n": 1}})));

        // The first open's resolution finishes first and is discarded
        assert!(fx.manager.next_resolution().await);
        assert!(calls.lock().unwrap().is_empty());
        assert!(fx.manager.contains("d"));
        assert!(fx.manager.comm_mut("d").is_none());

        release.send(()).unwrap();
        assert!(fx.manager.next_resolution().await);
        assert_eq!(*calls.lock().unwrap(), vec!["slow", "slow:1"]);
        assert_eq!(fx.manager.comm_mut("d").unwrap().target_name(), "slow");
        assert!(fx.outbound.try_recv().is_err());
    }

    #[test]
    fn failing_callbacks_do_not_stop_other_comms() {
        let mut fx = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        fx.manager.register_target("echo", move |comm, _| {
            let (on_msg, on_close) = (recorded.clone(), recorded.clone());
            let id = comm.comm_id().to_string();
            let close_id = id.clone();
            comm.on_msg(move |_| {
                on_msg.lock().unwrap().push(format!("msg:{}", id));
                if id == "bad" {
                    anyhow::bail!("handler broke");
                }
                Ok(())
            });
            comm.on_close(move |_| {
                on_close.lock().unwrap().push(format!("close:{}", close_id));
                anyhow::bail!("close handler broke")
            });
            Ok(())
        });

        for id in ["bad", "good"] {
            fx.manager.comm_open(&kernel_msg(
                "comm_open",
                json!({"comm_id": id, "target_name": "echo"}),
            ));
        }
        for id in ["bad", "good", "bad", "good"] {
            fx.manager
                .comm_msg(&kernel_msg("comm_msg", json!({"comm_id": id, "data": {}})));
        }
        fx.manager
            .comm_close(&kernel_msg("comm_close", json!({"comm_id": "bad"})));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["msg:bad", "msg:good", "msg:bad", "msg:good", "close:bad"]
        );
        assert!(!fx.manager.contains("bad"));
        assert!(fx.manager.contains("good"));
        assert!(fx.outbound.try_recv().is_err());
    }
}
