//
// kernel_model.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Models returned by the Jupyter server's kernel REST API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A running kernel, as described by `/api/kernels`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelModel {
    /// The server-assigned kernel ID
    pub id: String,

    /// The kernel spec name, e.g. "python3"
    pub name: String,

    /// When the kernel last saw activity, as an ISO 8601 string
    pub last_activity: Option<String>,

    /// The last execution state the server saw
    pub execution_state: Option<String>,

    /// The number of clients connected to the kernel
    pub connections: Option<u32>,
}

/// From the Jupyter documentation for [Kernel Specs](https://jupyter-client.readthedocs.io/en/stable/kernels.html#kernel-specs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// List of command line arguments to be used to start the kernel
    #[serde(default)]
    pub argv: Vec<String>,

    /// The kernel name as it should be displayed in the UI
    pub display_name: String,

    /// The kernel's language
    pub language: String,

    /// Environment variables to set for the kernel
    #[serde(default)]
    pub env: serde_json::Map<String, serde_json::Value>,
}

/// One entry of the `/api/kernelspecs` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecEntry {
    /// The kernel spec name
    pub name: String,

    /// The kernel spec itself
    pub spec: KernelSpec,

    /// Resource URLs (logos and the like)
    #[serde(default)]
    pub resources: serde_json::Map<String, serde_json::Value>,
}

/// The `/api/kernelspecs` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecs {
    /// The name of the default kernel spec
    pub default: String,

    /// Available kernel specs, keyed by name
    pub kernelspecs: BTreeMap<String, KernelSpecEntry>,
}

impl KernelSpecs {
    /// Look up a kernel spec by name.
    pub fn select(&self, name: &str) -> Option<&KernelSpecEntry> {
        self.kernelspecs.get(name)
    }

    /// Names of the kernel specs implementing `language` (compared
    /// case-insensitively), sorted by name.
    pub fn find_by_language(&self, language: &str) -> Vec<String> {
        if language.is_empty() {
            return Vec::new();
        }
        self.kernelspecs
            .values()
            .filter(|entry| entry.spec.language.eq_ignore_ascii_case(language))
            .map(|entry| entry.name.clone())
            .collect()
    }
}
