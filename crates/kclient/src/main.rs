//
// main.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! kclient
//!
//! Command line client for Jupyter kernels

use std::path::PathBuf;

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use kclient::{
    service::{KernelService, RestKernelService},
    transport::WebsocketTransport,
    Callbacks, ClientConfig, ConnectionState, KernelClient,
};
use kshared::{jupyter_message::JupyterMessage, kernel_model::KernelModel};
use serde_json::{json, Map, Value};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// URL of the Jupyter server. Overrides the configuration file.
    #[arg(short, long, value_name = "URL")]
    url: Option<String>,

    /// Path to a JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// API token for the Jupyter server
    #[arg(long)]
    token: Option<String>,

    /// Log level (error, warn, info, debug, trace). Defaults to RUST_LOG.
    #[arg(long)]
    log_level: Option<log::LevelFilter>,

    /// Subcommands
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List running kernels
    List,

    /// List available kernel specs
    Specs {
        /// Only show kernel specs for this language
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Start a new kernel
    Start {
        /// The kernel spec to use. Defaults to the configured kernel name.
        #[arg(short, long)]
        kernel: Option<String>,
    },

    /// Get kernel info from a running kernel
    Info {
        /// The kernel to get info for. Optional; if not provided, the first
        /// running kernel will be used
        #[arg(short = 'i', long)]
        kernel_id: Option<String>,
    },

    /// Execute code in a running kernel
    Execute {
        /// The kernel to execute code in. Optional; if not provided, the
        /// first running kernel will be used
        #[arg(short = 'i', long)]
        kernel_id: Option<String>,

        /// The code to execute
        #[arg(short, long)]
        code: String,

        /// Whether to wait for execution to finish
        #[arg(short, long)]
        wait: bool,
    },

    /// Interrupt a running kernel
    Interrupt {
        /// The kernel to interrupt. Optional; if not provided, the first
        /// running kernel will be used
        #[arg(short = 'i', long)]
        kernel_id: Option<String>,
    },

    /// Restart a running kernel
    Restart {
        /// The kernel to restart. Optional; if not provided, the first
        /// running kernel will be used
        #[arg(short = 'i', long)]
        kernel_id: Option<String>,
    },

    /// Listen to events from a running kernel
    Listen {
        /// The kernel to listen to. Optional; if not provided, the first
        /// running kernel will be used
        #[arg(short = 'i', long)]
        kernel_id: Option<String>,
    },

    /// Shut down a running kernel
    Kill {
        /// The kernel to kill. Optional; if not provided, the first running
        /// kernel will be used
        #[arg(short = 'i', long)]
        kernel_id: Option<String>,
    },
}

/// Find the kernel to operate on: the one named, or else the first one
/// running.
async fn resolve_kernel(
    service: &dyn KernelService,
    kernel_id: Option<String>,
) -> anyhow::Result<KernelModel> {
    match kernel_id {
        Some(id) => service.get_info(&id).await,
        None => service
            .list()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No kernels are running")),
    }
}

/// Connect and wait until the kernel has answered the kernel info request.
async fn connect_ready(client: &mut KernelClient, model: KernelModel) -> anyhow::Result<()> {
    client.connect(model).await?;
    while client.info_reply().is_none() {
        if client.state() == ConnectionState::Dead {
            bail!("Connection to the kernel died");
        }
        client.process_next().await;
    }
    Ok(())
}

fn print_output(msg: &JupyterMessage) -> anyhow::Result<()> {
    let content = &msg.content;
    match msg.msg_type() {
        "stream" => print!("{}", content["text"].as_str().unwrap_or_default()),
        "execute_result" | "display_data" => match content["data"]["text/plain"].as_str() {
            Some(text) => println!("{}", text),
            None => println!("{}", serde_json::to_string_pretty(&content["data"])?),
        },
        "error" => {
            let traceback = content["traceback"]
                .as_array()
                .map(|lines| {
                    lines
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            eprintln!(
                "{}: {}\n{}",
                content["ename"].as_str().unwrap_or("Error"),
                content["evalue"].as_str().unwrap_or_default(),
                traceback
            );
        }
        other => log::debug!("Ignoring {} output", other),
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = args.url {
        config.base_url = url;
    }
    if args.token.is_some() {
        config.token = args.token;
    }
    let service = RestKernelService::new(&config)?;
    let new_client = |config: &ClientConfig| {
        KernelClient::new(
            config.clone(),
            Box::new(service.clone()),
            Box::new(WebsocketTransport::new()),
        )
    };

    match args.command {
        Commands::List => {
            let kernels = service.list().await?;
            println!("{}", serde_json::to_string_pretty(&kernels)?);
        }
        Commands::Specs { language } => {
            let specs = service.kernel_specs().await?;
            match language {
                Some(language) => {
                    for name in specs.find_by_language(&language) {
                        println!("{}", name);
                    }
                }
                None => println!("{}", serde_json::to_string_pretty(&specs)?),
            }
        }
        Commands::Start { kernel } => {
            if let Some(kernel) = kernel {
                config.kernel_name = kernel;
            }
            let mut client = new_client(&config);
            let model = client.start().await?;
            println!("{}", serde_json::to_string_pretty(&model)?);
            client.stop_channels().await;
        }
        Commands::Info { kernel_id } => {
            let model = resolve_kernel(&service, kernel_id).await?;
            let mut client = new_client(&config);
            connect_ready(&mut client, model).await?;
            if let Some(info) = client.info_reply() {
                println!("{}", serde_json::to_string_pretty(info)?);
            }
            client.stop_channels().await;
        }
        Commands::Execute {
            kernel_id,
            code,
            wait,
        } => {
            let model = resolve_kernel(&service, kernel_id).await?;
            let mut client = new_client(&config);
            connect_ready(&mut client, model).await?;

            let callbacks = Callbacks::new().on_output(print_output).on_reply(|reply| {
                log::info!(
                    "Execution finished with status {}",
                    reply.content["status"].as_str().unwrap_or("unknown")
                );
                Ok(())
            });
            let mut options = Map::new();
            options.insert(String::from("silent"), json!(false));
            options.insert(String::from("store_history"), json!(true));
            let msg_id = client.execute(&code, callbacks, Some(options)).await?;
            log::debug!("Sent execute request {}", msg_id);

            while wait && client.has_callbacks(&msg_id) {
                if client.state() == ConnectionState::Dead {
                    bail!("Connection to the kernel died");
                }
                client.process_next().await;
            }
            client.stop_channels().await;
        }
        Commands::Interrupt { kernel_id } => {
            let model = resolve_kernel(&service, kernel_id).await?;
            service.interrupt(&model.id).await?;
            println!("Interrupted kernel {}", model.id);
        }
        Commands::Restart { kernel_id } => {
            let model = resolve_kernel(&service, kernel_id).await?;
            let mut client = new_client(&config);
            connect_ready(&mut client, model).await?;
            let model = client.restart().await?;
            while client.info_reply().is_none() && client.state() != ConnectionState::Dead {
                client.process_next().await;
            }
            println!("Restarted kernel {}", model.id);
            client.stop_channels().await;
        }
        Commands::Listen { kernel_id } => {
            let model = resolve_kernel(&service, kernel_id).await?;
            let mut client = new_client(&config);
            let events = client.events();
            client.connect(model).await?;
            while client.state() != ConnectionState::Dead {
                client.process_next().await;
                while let Ok(event) = events.try_recv() {
                    println!(
                        "[{}] {:?}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        event
                    );
                }
            }
        }
        Commands::Kill { kernel_id } => {
            let model = resolve_kernel(&service, kernel_id).await?;
            service.kill(&model.id).await?;
            println!("Killed kernel {}", model.id);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Read command line arguments
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if let Some(level) = args.log_level {
        logger.filter_level(level);
    }
    logger.init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}
