//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//

#![allow(dead_code)]

pub mod service;
pub mod transport;

use kclient::{ClientConfig, KernelClient, KernelEvent};
use kshared::jupyter_message::{
    JupyterChannel, JupyterMessage, JupyterMessageHeader, MessageFactory,
};
use kshared::wire_codec::{self, WireFrame};
use serde_json::Value;

use service::{kernel_model, MockService};
use transport::{mock_transport, TransportHandle};

pub const KERNEL_ID: &str = "8d1c5f0e-kernel";

pub struct Harness {
    pub client: KernelClient,
    pub transport: TransportHandle,
    pub service: MockService,
    pub events: async_channel::Receiver<KernelEvent>,
}

impl Harness {
    /// A client that has not connected to anything.
    pub fn new() -> Self {
        let (transport, handle) = mock_transport();
        let service = MockService::new(kernel_model(KERNEL_ID));
        let client = KernelClient::new(
            ClientConfig::default(),
            Box::new(service.clone()),
            Box::new(transport),
        );
        let events = client.events();
        Self {
            client,
            transport: handle,
            service,
            events,
        }
    }

    /// A client connected to a running kernel, with the traffic and events
    /// of connecting already drained.
    pub async fn connected() -> Self {
        let mut harness = Self::new();
        harness
            .client
            .connect(kernel_model(KERNEL_ID))
            .await
            .unwrap();
        harness.transport.take_sent();
        harness.drain_events();
        harness
    }

    pub fn drain_events(&self) -> Vec<KernelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Deliver a message from the kernel.
    pub async fn deliver(&mut self, msg: JupyterMessage) {
        let frame = wire_codec::serialize(&msg).unwrap();
        self.deliver_frame(frame).await;
    }

    pub async fn deliver_frame(&mut self, frame: WireFrame) {
        self.client
            .handle_transport_event(kclient::transport::TransportEvent::Message(frame))
            .await;
    }
}

/// Build a message as the kernel would send it, in reply to `parent_id`.
pub fn kernel_msg(
    channel: JupyterChannel,
    msg_type: &str,
    parent_id: Option<&str>,
    content: Value,
) -> JupyterMessage {
    let factory = MessageFactory::new(
        String::from("kernel"),
        String::from("kernel-session"),
        String::from("5.3"),
    );
    let mut msg = factory.build(msg_type, channel, content, None, Vec::new());
    msg.parent_header = parent_id.map(|id| JupyterMessageHeader {
        msg_id: id.to_string(),
        msg_type: String::from("request"),
        username: String::from("username"),
        session: String::from("client-session"),
        version: String::from("5.3"),
        date: None,
    });
    msg
}

pub fn status(parent_id: Option<&str>, state: &str) -> JupyterMessage {
    kernel_msg(
        JupyterChannel::IOPub,
        "status",
        parent_id,
        serde_json::json!({ "execution_state": state }),
    )
}

pub fn kernel_info_reply(parent_id: &str) -> JupyterMessage {
    kernel_msg(
        JupyterChannel::Shell,
        "kernel_info_reply",
        Some(parent_id),
        serde_json::json!({
            "status": "ok",
            "protocol_version": "5.3",
            "implementation": "ipython",
            "implementation_version": "8.20.0",
            "language_info": {
                "name": "python",
                "version": "3.12.1",
                "mimetype": "text/x-python",
                "file_extension": ".py"
            },
            "banner": "Python 3.12.1",
            "help_links": []
        }),
    )
}

pub fn count_events(events: &[KernelEvent], pred: impl Fn(&KernelEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

pub fn iopub(msg_type: &str, parent_id: &str, content: Value) -> JupyterMessage {
    kernel_msg(JupyterChannel::IOPub, msg_type, Some(parent_id), content)
}

pub fn shell(msg_type: &str, parent_id: &str, content: Value) -> JupyterMessage {
    kernel_msg(JupyterChannel::Shell, msg_type, Some(parent_id), content)
}

pub fn stdin(msg_type: &str, parent_id: &str, content: Value) -> JupyterMessage {
    kernel_msg(JupyterChannel::Stdin, msg_type, Some(parent_id), content)
}
