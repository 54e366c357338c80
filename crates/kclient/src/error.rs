//
// error.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use kshared::wire_codec::CodecError;
use log::error;

/// Errors raised by the kernel client.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// A message from the kernel could not be decoded. Non-fatal; the
    /// message is dropped.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A message was sent while the kernel connection was not open.
    /// Messages are never queued for later delivery.
    #[error("Kernel is not connected")]
    NotConnected,

    /// The handler for a comm target could not be resolved or failed while
    /// opening the comm.
    #[error("Could not open comm {comm_id} for target '{target_name}': {reason}")]
    TargetResolutionFailed {
        comm_id: String,
        target_name: String,
        reason: String,
    },

    /// A caller-supplied callback returned an error.
    #[error("Exception in {context} handler: {error:#}")]
    HandlerException {
        context: String,
        error: anyhow::Error,
    },

    /// The connection is permanently lost; the kernel must be explicitly
    /// restarted.
    #[error("Connection to the kernel is dead")]
    ConnectionDead,

    /// No kernel has been started or attached yet.
    #[error("No kernel has been started")]
    NoKernel,

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Kernel service request failed: {0:#}")]
    Service(anyhow::Error),
}

impl From<CodecError> for KernelError {
    fn from(err: CodecError) -> Self {
        KernelError::MalformedMessage(err.to_string())
    }
}

impl KernelError {
    /// A short, stable code for this error, for logs and UI display.
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::MalformedMessage(_) => "KC-1",
            KernelError::NotConnected => "KC-2",
            KernelError::TargetResolutionFailed { .. } => "KC-3",
            KernelError::HandlerException { .. } => "KC-4",
            KernelError::ConnectionDead => "KC-5",
            KernelError::NoKernel => "KC-6",
            KernelError::Transport(_) => "KC-7",
            KernelError::Service(_) => "KC-8",
        }
    }

    pub fn log(&self) {
        error!("Error {}: {}", self.code(), self);
    }
}
