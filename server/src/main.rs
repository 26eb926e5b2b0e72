use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use certgate_common::config::{self, env_opt};
use certgate_server::{
    access_log::{AccessLogFormat, WriterAccessLog},
    MtlsServer, ServerConfig,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // diagnostics go to stderr; stdout carries the access log
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting certgate server...");

    let format = match env_opt(config::ACCESS_LOG_FORMAT_ENV) {
        Some(raw) => raw.parse::<AccessLogFormat>().map_err(|e| anyhow!(e))?,
        None => AccessLogFormat::default(),
    };
    let bind_addr =
        env_opt(config::BIND_ADDR_ENV).unwrap_or_else(|| config::DEFAULT_BIND_ADDR.to_string());

    let server_config = ServerConfig::from_env().context("Failed to load server credentials")?;
    let server = MtlsServer::new(server_config, Arc::new(WriterAccessLog::stdout(format)))
        .context("Failed to create server")?;

    server
        .serve(&bind_addr)
        .with_context(|| format!("Server error on {bind_addr}"))?;
    Ok(())
}
