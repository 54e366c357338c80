//
// service.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Out-of-band kernel lifecycle requests against the Jupyter server's REST
//! API.

use std::fmt;

use async_trait::async_trait;
use kshared::kernel_model::{KernelModel, KernelSpecs};
use reqwest::{Method, RequestBuilder};
use url::Url;

use crate::config::ClientConfig;

/// Lifecycle operations on kernels, served outside the websocket.
#[async_trait]
pub trait KernelService: Send + Sync + fmt::Debug {
    /// List the running kernels.
    async fn list(&self) -> anyhow::Result<Vec<KernelModel>>;

    /// Start a new kernel from the named kernel spec.
    async fn start(&self, name: &str) -> anyhow::Result<KernelModel>;

    /// Get the server's view of a kernel. Fails if the kernel is gone.
    async fn get_info(&self, kernel_id: &str) -> anyhow::Result<KernelModel>;

    /// Interrupt the kernel.
    async fn interrupt(&self, kernel_id: &str) -> anyhow::Result<()>;

    /// Restart the kernel, resolving once the server reports it restarted.
    async fn restart(&self, kernel_id: &str) -> anyhow::Result<KernelModel>;

    /// Shut the kernel down.
    async fn kill(&self, kernel_id: &str) -> anyhow::Result<()>;

    /// List the available kernel specs.
    async fn kernel_specs(&self) -> anyhow::Result<KernelSpecs>;
}

/// A [`KernelService`] backed by the Jupyter server REST API.
#[derive(Clone)]
pub struct RestKernelService {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for RestKernelService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keep the token out of logs
        f.debug_struct("RestKernelService")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl RestKernelService {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: Url::parse(&config.base_url)?,
            token: config.token.clone(),
        })
    }

    /// Join encoded path segments onto the base URL.
    fn url(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Base URL {} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        log::debug!("{} {}", method, url);
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.header(reqwest::header::AUTHORIZATION, format!("token {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl KernelService for RestKernelService {
    async fn list(&self) -> anyhow::Result<Vec<KernelModel>> {
        let url = self.url(&["api", "kernels"])?;
        let kernels = self
            .request(Method::GET, url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(kernels)
    }

    async fn start(&self, name: &str) -> anyhow::Result<KernelModel> {
        let url = self.url(&["api", "kernels"])?;
        let kernel = self
            .request(Method::POST, url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(kernel)
    }

    async fn get_info(&self, kernel_id: &str) -> anyhow::Result<KernelModel> {
        let url = self.url(&["api", "kernels", kernel_id])?;
        let kernel = self
            .request(Method::GET, url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(kernel)
    }

    async fn interrupt(&self, kernel_id: &str) -> anyhow::Result<()> {
        let url = self.url(&["api", "kernels", kernel_id, "interrupt"])?;
        self.request(Method::POST, url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn restart(&self, kernel_id: &str) -> anyhow::Result<KernelModel> {
        let url = self.url(&["api", "kernels", kernel_id, "restart"])?;
        let kernel = self
            .request(Method::POST, url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(kernel)
    }

    async fn kill(&self, kernel_id: &str) -> anyhow::Result<()> {
        let url = self.url(&["api", "kernels", kernel_id])?;
        self.request(Method::DELETE, url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn kernel_specs(&self) -> anyhow::Result<KernelSpecs> {
        let url = self.url(&["api", "kernelspecs"])?;
        let specs = self
            .request(Method::GET, url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(specs)
    }
}
