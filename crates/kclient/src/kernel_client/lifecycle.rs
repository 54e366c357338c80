//
// lifecycle.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Kernel lifecycle (start, connect, interrupt, restart, kill) and the
//! connection state machine, including reconnection.

use kshared::kernel_model::KernelModel;
use tokio::time::Instant;

use crate::{
    error::KernelError,
    events::KernelEvent,
    kernel_state::ConnectionState,
    reconnect::ReconnectDecision,
};

use super::KernelClient;

impl KernelClient {
    /// Start a new kernel from the configured kernel spec and connect to it.
    pub async fn start(&mut self) -> Result<KernelModel, KernelError> {
        self.events.emit(KernelEvent::Starting);
        log::info!("Starting a '{}' kernel", self.config.kernel_name);
        let model = self
            .service
            .start(&self.config.kernel_name)
            .await
            .map_err(KernelError::Service)?;
        self.kernel_created(model.clone()).await?;
        Ok(model)
    }

    /// Connect to a kernel that is already running.
    pub async fn connect(&mut self, model: KernelModel) -> Result<(), KernelError> {
        log::info!("[kernel {}] Attaching to running kernel", model.id);
        self.kernel = Some(model);
        self.reconnect.reset();
        self.start_channels().await
    }

    async fn kernel_created(&mut self, model: KernelModel) -> Result<(), KernelError> {
        log::info!("[kernel {}] Kernel created ({})", model.id, model.name);
        self.events.emit(KernelEvent::Created {
            kernel_id: model.id.clone(),
        });
        self.connect(model).await
    }

    /// The websocket URL for the kernel's channels.
    fn channels_url(&self) -> Result<String, KernelError> {
        let kernel_id = self.require_kernel()?;
        let base = self.config.websocket_base();
        let mut url = url::Url::parse(&base).map_err(|e| KernelError::Service(e.into()))?;
        url.path_segments_mut()
            .map_err(|_| KernelError::Service(anyhow::anyhow!("Invalid websocket URL {}", base)))?
            .pop_if_empty()
            .extend(["api", "kernels", kernel_id.as_str(), "channels"]);
        url.query_pairs_mut()
            .append_pair("session_id", self.session_id());
        Ok(url.to_string())
    }

    /// Open the channels, closing any existing connection first.
    pub async fn start_channels(&mut self) -> Result<(), KernelError> {
        let url = self.channels_url()?;
        self.stop_channels().await;
        self.ws_url = Some(url.clone());
        self.close_handled = false;
        self.set_state(ConnectionState::Connecting);

        match self.transport.open(&url).await {
            Ok(()) => {
                self.kernel_connected().await;
                Ok(())
            }
            Err(e) => {
                log::error!("[kernel {}] {}", self.log_id(), e);
                self.handle_error(e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Close the channels. No reconnection is attempted.
    pub async fn stop_channels(&mut self) {
        self.reconnect_at = None;
        if self.transport.is_open() {
            log::debug!("[kernel {}] Closing channels", self.log_id());
            self.transport.close().await;
        }
        // Replies to our own info requests can no longer arrive
        for msg_id in std::mem::take(&mut self.info_requests) {
            self.callbacks.clear(&msg_id);
        }
        if self.state() == ConnectionState::Connected
            || self.state() == ConnectionState::Connecting
        {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn kernel_connected(&mut self) {
        log::info!("[kernel {}] Connected", self.log_id());
        self.set_state(ConnectionState::Connected);
        self.reconnect.reset();
        self.reconnect_at = None;
        self.events.emit(KernelEvent::Connected);

        // Learn what the kernel is before considering it ready
        if let Err(e) = self.request_kernel_info().await {
            log::warn!(
                "[kernel {}] Could not request kernel info: {}",
                self.log_id(),
                e
            );
        }
    }

    /// The connection closed.
    pub(super) async fn handle_close(&mut self, was_clean: bool) {
        if self.close_handled {
            return;
        }
        self.close_handled = true;
        self.set_state(ConnectionState::Disconnected);
        self.events.emit(KernelEvent::Disconnected);

        if was_clean {
            log::info!("[kernel {}] Connection closed", self.log_id());
            return;
        }

        // An unclean close can mean the kernel died, or only that it is
        // slow to start; ask the server which
        let Some(kernel_id) = self.kernel_id().map(str::to_string) else {
            return;
        };
        log::warn!(
            "[kernel {}] Connection dropped; checking whether the kernel is alive",
            kernel_id
        );
        match self.service.get_info(&kernel_id).await {
            Ok(model) => {
                self.kernel = Some(model);
                self.schedule_reconnect();
            }
            Err(e) => {
                log::error!("[kernel {}] Kernel is gone: {:#}", kernel_id, e);
                self.kernel_dead().await;
            }
        }
    }

    /// The connection failed.
    pub(super) async fn handle_error(&mut self, reason: String) {
        if self.close_handled {
            return;
        }
        self.close_handled = true;
        self.transport.close().await;
        self.set_state(ConnectionState::Disconnected);
        self.events.emit(KernelEvent::Disconnected);

        let url = self.ws_url.clone().unwrap_or_default();
        log::error!("[kernel {}] Connection to {} failed: {}", self.log_id(), url, reason);
        self.events.emit(KernelEvent::ConnectionFailed {
            url,
            attempt: self.reconnect.attempt(),
        });
        self.schedule_reconnect();
    }

    /// Schedule the next reconnection attempt, or give up.
    fn schedule_reconnect(&mut self) {
        match self.reconnect.decide() {
            ReconnectDecision::Retry { delay } => {
                log::info!(
                    "[kernel {}] Connection lost, reconnecting in {} seconds",
                    self.log_id(),
                    delay.as_secs()
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            ReconnectDecision::GiveUp { attempts } => {
                log::error!(
                    "[kernel {}] Failed to reconnect after {} attempts; giving up",
                    self.log_id(),
                    attempts
                );
                KernelError::ConnectionDead.log();
                self.reconnect_at = None;
                self.set_state(ConnectionState::Dead);
                self.events
                    .emit(KernelEvent::ConnectionDead { attempt: attempts });
            }
        }
    }

    /// Reconnect to the kernel after the connection was lost. Does nothing
    /// if connected.
    pub async fn reconnect(&mut self) -> Result<(), KernelError> {
        if self.is_connected() {
            return Ok(());
        }
        let attempt = self.reconnect.begin_attempt();
        log::info!("[kernel {}] Reconnecting (attempt {})", self.log_id(), attempt);
        self.events.emit(KernelEvent::Reconnecting { attempt });
        self.start_channels().await
    }

    /// Tear down after the kernel died. Terminal until an explicit restart.
    pub(super) async fn kernel_dead(&mut self) {
        self.stop_channels().await;
        self.set_state(ConnectionState::Dead);
        self.events.emit(KernelEvent::Dead);
    }

    /// Interrupt the kernel, then refresh the kernel info so the current
    /// state is known.
    pub async fn interrupt(&mut self) -> Result<(), KernelError> {
        let kernel_id = self.require_kernel()?;
        log::info!("[kernel {}] Interrupting", kernel_id);
        self.events.emit(KernelEvent::Interrupting);
        self.service
            .interrupt(&kernel_id)
            .await
            .map_err(KernelError::Service)?;
        if self.is_connected() {
            self.request_kernel_info().await?;
        }
        Ok(())
    }

    /// Restart the kernel. The channels are closed and reopened once the
    /// server confirms; if the restart fails the kernel is considered dead.
    pub async fn restart(&mut self) -> Result<KernelModel, KernelError> {
        let kernel_id = self.require_kernel()?;
        log::info!("[kernel {}] Restarting", kernel_id);
        self.restarting = true;
        self.events.emit(KernelEvent::Restarting);
        self.stop_channels().await;

        match self.service.restart(&kernel_id).await {
            Ok(model) => {
                self.kernel_created(model.clone()).await?;
                Ok(model)
            }
            Err(e) => {
                log::error!("[kernel {}] Restart failed: {:#}", kernel_id, e);
                self.restarting = false;
                self.kernel_dead().await;
                Err(KernelError::Service(e))
            }
        }
    }

    /// Kill the kernel.
    pub async fn kill(&mut self) -> Result<(), KernelError> {
        let kernel_id = self.require_kernel()?;
        log::info!("[kernel {}] Killing", kernel_id);
        self.events.emit(KernelEvent::Killed);
        self.kernel_dead().await;
        self.service
            .kill(&kernel_id)
            .await
            .map_err(KernelError::Service)
    }
}
