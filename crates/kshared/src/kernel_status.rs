//
// kernel_status.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use serde::{Deserialize, Serialize};

/// The execution states a kernel reports in iopub `status` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// The kernel is in the process of starting
    Starting,
    /// The kernel is idle
    Idle,
    /// The kernel is busy
    Busy,
    /// The server is restarting the kernel after it died
    Restarting,
    /// The kernel has died and will not be restarted
    Dead,
    /// Any state this client does not recognize
    #[serde(other)]
    Unknown,
}

/// The content of an iopub `status` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusContent {
    pub execution_state: ExecutionState,
}
