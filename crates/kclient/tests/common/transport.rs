//
// transport.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//

//! An in-memory transport that records what the client does with it

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kclient::transport::{Transport, TransportError, TransportEvent};
use kshared::jupyter_message::JupyterMessage;
use kshared::wire_codec::{self, WireFrame};

#[derive(Debug, Default)]
struct State {
    open: bool,
    fail_opens: bool,
    opened: Vec<String>,
    sent: Vec<WireFrame>,
    closes: usize,
}

/// The client's side of the mock.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
    events: async_channel::Receiver<TransportEvent>,
}

/// The test's side of the mock: inspects traffic and injects events.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    state: Arc<Mutex<State>>,
    events: async_channel::Sender<TransportEvent>,
}

pub fn mock_transport() -> (MockTransport, TransportHandle) {
    let state = Arc::new(Mutex::new(State::default()));
    let (tx, rx) = async_channel::unbounded();
    (
        MockTransport {
            state: state.clone(),
            events: rx,
        },
        TransportHandle { state, events: tx },
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, url: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.opened.push(url.to_string());
        if state.fail_opens {
            state.open = false;
            return Err(TransportError::ConnectFailed {
                url: url.to_string(),
                reason: String::from("connection refused"),
            });
        }
        state.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(frame);
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
    }

    async fn next_event(&mut self) -> TransportEvent {
        if !self.is_open() {
            return futures::future::pending().await;
        }
        match self.events.recv().await {
            Ok(event) => {
                if !matches!(event, TransportEvent::Message(_)) {
                    self.state.lock().unwrap().open = false;
                }
                event
            }
            Err(_) => futures::future::pending().await,
        }
    }
}

#[allow(dead_code)]
impl TransportHandle {
    /// Make every subsequent open fail (or succeed again).
    pub fn fail_opens(&self, fail: bool) {
        self.state.lock().unwrap().fail_opens = fail;
    }

    /// The URLs of every open attempt, in order.
    pub fn opened(&self) -> Vec<String> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    pub fn sent_frames(&self) -> Vec<WireFrame> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Decode everything sent so far.
    pub fn sent(&self) -> Vec<JupyterMessage> {
        self.sent_frames()
            .into_iter()
            .map(|frame| wire_codec::deserialize(frame).unwrap())
            .collect()
    }

    /// Decode and forget everything sent so far.
    pub fn take_sent(&self) -> Vec<JupyterMessage> {
        let frames = std::mem::take(&mut self.state.lock().unwrap().sent);
        frames
            .into_iter()
            .map(|frame| wire_codec::deserialize(frame).unwrap())
            .collect()
    }

    /// Queue an event for the client's next `next_event`.
    pub fn push(&self, event: TransportEvent) {
        self.events.try_send(event).unwrap();
    }
}
