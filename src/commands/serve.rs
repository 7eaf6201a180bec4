use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use crate::error::ExitError;
use crate::maintenance::Maintenance;
use crate::server;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Config file (TOML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Listen address, overrides the config file
    #[arg(long)]
    pub listen: Option<String>,
}

impl ServeArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let cwd = std::env::current_dir().context("reading current directory")?;
        let (mut config, path) = ServerConfig::resolve(self.config.as_deref(), &cwd)?;
        if let Some(listen) = &self.listen {
            config.listen.clone_from(listen);
        }
        let addr = config.listen_addr()?;

        match &path {
            Some(path) => info!(config = %path.display(), "configuration loaded"),
            None => info!("no config file found, using defaults"),
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("starting async runtime")?;
        runtime.block_on(run(config, addr))
    }
}

async fn run(config: ServerConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| ExitError::Bind {
        addr: addr.to_string(),
        message: e.to_string(),
    })?;

    let coordinator = Arc::new(Coordinator::new(
        &config.coordinator_options(),
        config.admin_auth(),
    ));
    if !coordinator.admin().is_enabled() {
        warn!("no admin password digest configured, get-botcount is disabled");
    }
    let canvas = config.canvas_source();
    if canvas.is_empty() {
        warn!("no canvas regions configured, the board keeps its initial colors");
    }
    info!(
        width = config.board.width,
        height = config.board.height,
        regions = canvas.len(),
        template = %config.template.source,
        "starting placeherd"
    );

    let shutdown = CancellationToken::new();
    let maintenance = Maintenance::new(
        Arc::clone(&coordinator),
        Arc::new(canvas),
        Arc::new(config.template_source()),
    )
    .with_delay(config.cycle_delay());
    let maintenance = tokio::spawn(maintenance.run(shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            return;
        }
        info!("shutdown requested");
        signal.cancel();
    });

    server::serve(listener, coordinator, shutdown.clone())
        .await
        .context("serving worker connections")?;

    shutdown.cancel();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "maintenance task ended abnormally");
    }
    info!("stopped");
    Ok(())
}
