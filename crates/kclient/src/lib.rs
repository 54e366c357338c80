//
// lib.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! A client for Jupyter kernels, reached over a Jupyter server's websocket
//! channels.

/// Request correlation and caller callbacks
pub mod callbacks;

/// Comms multiplexed over the kernel connection
pub mod comm;

/// Client configuration
pub mod config;

/// Client errors
pub mod error;

/// Events published to observers
pub mod events;

/// The kernel client
pub mod kernel_client;

/// Connection states
pub mod kernel_state;

/// Reconnection backoff
pub mod reconnect;

/// Kernel lifecycle REST service
pub mod service;

/// Duplex message transports
pub mod transport;

pub use callbacks::Callbacks;
pub use config::ClientConfig;
pub use error::KernelError;
pub use events::KernelEvent;
pub use kernel_client::KernelClient;
pub use kernel_state::ConnectionState;
