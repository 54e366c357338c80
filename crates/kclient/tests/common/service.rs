//
// service.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//

//! A kernel service that answers from memory

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kclient::service::KernelService;
use kshared::kernel_model::{KernelModel, KernelSpecs};

#[derive(Debug)]
struct State {
    model: KernelModel,
    calls: Vec<String>,
    kernel_alive: bool,
    restart_ok: bool,
}

#[derive(Debug, Clone)]
pub struct MockService {
    state: Arc<Mutex<State>>,
}

pub fn kernel_model(id: &str) -> KernelModel {
    KernelModel {
        id: id.to_string(),
        name: String::from("python3"),
        last_activity: None,
        execution_state: Some(String::from("idle")),
        connections: Some(1),
    }
}

#[allow(dead_code)]
impl MockService {
    pub fn new(model: KernelModel) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                model,
                calls: Vec::new(),
                kernel_alive: true,
                restart_ok: true,
            })),
        }
    }

    /// Whether `get_info` finds the kernel.
    pub fn set_kernel_alive(&self, alive: bool) {
        self.state.lock().unwrap().kernel_alive = alive;
    }

    pub fn set_restart_ok(&self, ok: bool) {
        self.state.lock().unwrap().restart_ok = ok;
    }

    /// The calls made so far, e.g. `get_info k1`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> KernelModel {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.model.clone()
    }
}

#[async_trait]
impl KernelService for MockService {
    async fn list(&self) -> anyhow::Result<Vec<KernelModel>> {
        Ok(vec![self.record(String::from("list"))])
    }

    async fn start(&self, name: &str) -> anyhow::Result<KernelModel> {
        Ok(self.record(format!("start {}", name)))
    }

    async fn get_info(&self, kernel_id: &str) -> anyhow::Result<KernelModel> {
        let model = self.record(format!("get_info {}", kernel_id));
        if self.state.lock().unwrap().kernel_alive {
            Ok(model)
        } else {
            anyhow::bail!("404 Not Found: kernel {} does not exist", kernel_id)
        }
    }

    async fn interrupt(&self, kernel_id: &str) -> anyhow::Result<()> {
        self.record(format!("interrupt {}", kernel_id));
        Ok(())
    }

    async fn restart(&self, kernel_id: &str) -> anyhow::Result<KernelModel> {
        let model = self.record(format!("restart {}", kernel_id));
        if self.state.lock().unwrap().restart_ok {
            Ok(model)
        } else {
            anyhow::bail!("500 Internal Server Error: restart failed")
        }
    }

    async fn kill(&self, kernel_id: &str) -> anyhow::Result<()> {
        self.record(format!("kill {}", kernel_id));
        Ok(())
    }

    async fn kernel_specs(&self) -> anyhow::Result<KernelSpecs> {
        self.record(String::from("kernel_specs"));
        Ok(serde_json::from_value(serde_json::json!({
            "default": "python3",
            "kernelspecs": {}
        }))?)
    }
}
