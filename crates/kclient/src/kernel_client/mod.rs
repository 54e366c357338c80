//
// mod.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! A client for a single Jupyter kernel, reached over a websocket.

mod dispatch;
mod lifecycle;
mod requests;

use std::collections::{HashMap, HashSet};

use kshared::{
    jupyter_message::{JupyterMessage, MessageFactory},
    kernel_info::KernelInfoReply,
    kernel_model::KernelModel,
    kernel_status::ExecutionState,
};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{
    callbacks::{CallbackRegistry, MessageCallback},
    comm::{CommManager, CommSender},
    config::ClientConfig,
    error::KernelError,
    events::{EventSender, KernelEvent},
    kernel_state::ConnectionState,
    reconnect::ReconnectCounter,
    service::KernelService,
    transport::{Transport, TransportEvent},
};

/// How many undelivered events are buffered before the oldest are displaced.
const EVENT_BUFFER: usize = 1024;

/// The handlers installed for iopub message types at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinIopub {
    Status,
    ClearOutput,
    ExecuteInput,
    Output,
    CommOpen,
    CommMsg,
    CommClose,
}

enum IopubHandler {
    Builtin(BuiltinIopub),
    Custom(MessageCallback),
}

fn default_iopub_handlers() -> HashMap<String, IopubHandler> {
    [
        ("status", BuiltinIopub::Status),
        ("clear_output", BuiltinIopub::ClearOutput),
        ("execute_input", BuiltinIopub::ExecuteInput),
        ("stream", BuiltinIopub::Output),
        ("display_data", BuiltinIopub::Output),
        ("execute_result", BuiltinIopub::Output),
        ("error", BuiltinIopub::Output),
        ("comm_open", BuiltinIopub::CommOpen),
        ("comm_msg", BuiltinIopub::CommMsg),
        ("comm_close", BuiltinIopub::CommClose),
    ]
    .into_iter()
    .map(|(msg_type, handler)| (msg_type.to_string(), IopubHandler::Builtin(handler)))
    .collect()
}

/// A client for one kernel.
///
/// Multiplexes concurrent requests over a single transport connection,
/// routes replies and output back to the callbacks of the request that
/// caused them, and reconnects with exponential backoff when the connection
/// drops. All state is mutated from the owner's task; drive the client with
/// [`KernelClient::run`] or [`KernelClient::process_next`].
pub struct KernelClient {
    config: ClientConfig,
    service: Box<dyn KernelService>,
    transport: Box<dyn Transport>,
    factory: MessageFactory,

    /// The kernel this client is attached to, if any
    kernel: Option<KernelModel>,

    /// The websocket URL of the current (or last) connection
    ws_url: Option<String>,

    state: watch::Sender<ConnectionState>,
    callbacks: CallbackRegistry,
    iopub_handlers: HashMap<String, IopubHandler>,
    comms: CommManager,

    /// Comm messages waiting to be transmitted
    outbound: async_channel::Receiver<JupyterMessage>,

    reconnect: ReconnectCounter,

    /// When the next reconnection attempt is due
    reconnect_at: Option<Instant>,

    /// Set once a close or error has been handled for the current
    /// connection; later notifications for it are ignored.
    close_handled: bool,

    /// Whether a user-requested restart is in flight
    restarting: bool,

    autorestart_attempt: u32,
    execution_state: ExecutionState,
    info_reply: Option<KernelInfoReply>,

    /// IDs of the kernel info requests this client issued itself
    info_requests: HashSet<String>,

    events: EventSender,
    events_rx: async_channel::Receiver<KernelEvent>,
}

impl std::fmt::Debug for KernelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelClient")
            .field("kernel", &self.kernel_id())
            .field("session", &self.factory.session)
            .field("state", &self.state())
            .field("execution_state", &self.execution_state)
            .field("callbacks", &self.callbacks.len())
            .field("comms", &self.comms.len())
            .finish()
    }
}

impl KernelClient {
    /// Create a client. No kernel is started or connected until
    /// [`KernelClient::start`] or [`KernelClient::connect`] is called.
    pub fn new(
        config: ClientConfig,
        service: Box<dyn KernelService>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let session = uuid::Uuid::new_v4().to_string();
        let factory = MessageFactory::new(
            config.username.clone(),
            session,
            config.protocol_version.clone(),
        );
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound) = async_channel::unbounded();
        let (events_tx, events_rx) = async_channel::bounded(EVENT_BUFFER);
        let events = EventSender::new(events_tx);
        let comms = CommManager::new(
            CommSender::new(factory.clone(), outbound_tx, state_rx),
            events.clone(),
        );
        let reconnect = ReconnectCounter::new(config.reconnect_limit);

        Self {
            config,
            service,
            transport,
            factory,
            kernel: None,
            ws_url: None,
            state,
            callbacks: CallbackRegistry::new(),
            iopub_handlers: default_iopub_handlers(),
            comms,
            outbound,
            reconnect,
            reconnect_at: None,
            close_handled: false,
            restarting: false,
            autorestart_attempt: 0,
            execution_state: ExecutionState::Unknown,
            info_reply: None,
            info_requests: HashSet::new(),
            events,
            events_rx,
        }
    }

    /// The stream of events this client publishes.
    pub fn events(&self) -> async_channel::Receiver<KernelEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn kernel(&self) -> Option<&KernelModel> {
        self.kernel.as_ref()
    }

    pub fn kernel_id(&self) -> Option<&str> {
        self.kernel.as_ref().map(|k| k.id.as_str())
    }

    /// The client session ID sent in every message header.
    pub fn session_id(&self) -> &str {
        &self.factory.session
    }

    /// The kernel's most recent `kernel_info_reply`.
    pub fn info_reply(&self) -> Option<&KernelInfoReply> {
        self.info_reply.as_ref()
    }

    /// The execution state the kernel last reported.
    pub fn execution_state(&self) -> ExecutionState {
        self.execution_state
    }

    pub fn comms(&mut self) -> &mut CommManager {
        &mut self.comms
    }

    /// Whether callbacks are still registered for a request, i.e. it has not
    /// both replied and gone idle.
    pub fn has_callbacks(&self, msg_id: &str) -> bool {
        self.callbacks.contains(msg_id)
    }

    /// Install a handler for an iopub message type, replacing any existing
    /// one (including the defaults).
    pub fn register_iopub_handler<F>(&mut self, msg_type: &str, handler: F)
    where
        F: FnMut(&JupyterMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.iopub_handlers
            .insert(msg_type.to_string(), IopubHandler::Custom(Box::new(handler)));
    }

    /// Wait for and handle one unit of work: a transport event, a queued
    /// comm message, a completed comm target resolution, or a due
    /// reconnection attempt.
    pub async fn process_next(&mut self) {
        let reconnect_due = self.reconnect_at.unwrap_or_else(Instant::now);
        let reconnect_scheduled = self.reconnect_at.is_some();
        let resolving = self.comms.has_pending();

        tokio::select! {
            // Comm sends accepted while connected go out before a queued
            // close or error can disconnect
            biased;

            msg = self.outbound.recv() => {
                if let Ok(msg) = msg {
                    self.transmit_outbound(msg).await;
                }
            }
            event = self.transport.next_event() => {
                self.handle_transport_event(event).await;
            }
            _ = self.comms.next_resolution(), if resolving => {
                self.flush_outbound().await;
            }
            _ = tokio::time::sleep_until(reconnect_due), if reconnect_scheduled => {
                self.reconnect_at = None;
                if let Err(e) = self.reconnect().await {
                    log::debug!("[kernel {}] Reconnection attempt failed: {}", self.log_id(), e);
                }
            }
        }
    }

    /// Drive the client until the connection is dead.
    pub async fn run(&mut self) {
        while self.state() != ConnectionState::Dead {
            self.process_next().await;
        }
        log::info!("[kernel {}] Connection is dead; client loop exiting", self.log_id());
    }

    /// Handle an event from the transport.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(frame) => {
                self.handle_frame(frame).await;
                // Handlers may have sent on comms during dispatch
                self.flush_outbound().await;
            }
            TransportEvent::Closed { was_clean } => self.handle_close(was_clean).await,
            TransportEvent::Error(reason) => self.handle_error(reason).await,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!(
                "[kernel {}] Connection state: {} => {}",
                self.log_id(),
                previous,
                state
            );
        }
    }

    fn log_id(&self) -> &str {
        self.kernel_id().unwrap_or("-")
    }

    fn require_kernel(&self) -> Result<String, KernelError> {
        self.kernel_id()
            .map(str::to_string)
            .ok_or(KernelError::NoKernel)
    }
}
