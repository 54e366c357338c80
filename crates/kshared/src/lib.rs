//! Shared Jupyter protocol types and wire codec for the kernel client.

/// Jupyter message types
pub mod jupyter_message;

/// Kernel info reply types
pub mod kernel_info;

/// Kernel REST API models
pub mod kernel_model;

/// Kernel execution states
pub mod kernel_status;

/// Websocket frame codec
pub mod wire_codec;
