use std::io;

use anyhow::{Context, Result};
use certgate_client::{ClientConfig, ConnectionConfig, CredentialPaths, MtlsClient, Request};
use certgate_common::config::{self, env_opt};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "certgate-client")]
#[command(about = "Connect to a certgate server with a client certificate")]
struct Args {
    /// Identity selector N: loads client{N}-crt.pem and client{N}-key.pem
    identity: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let paths = CredentialPaths::client(&args.identity);
    let credentials = ConnectionConfig::load(&paths)
        .with_context(|| format!("Failed to load credentials for client {}", args.identity))?;

    let server_addr =
        env_opt(config::SERVER_ADDR_ENV).unwrap_or_else(|| config::DEFAULT_SERVER_ADDR.to_string());
    let mut client_config = ClientConfig::new(credentials, server_addr.clone());
    if let Some(name) = env_opt(config::SERVER_NAME_ENV) {
        client_config = client_config.with_server_name(name);
    }

    let client = MtlsClient::new(client_config).context("Failed to create client")?;
    let mut body = client
        .fetch(&Request::get("/"))
        .with_context(|| format!("Request to {server_addr} failed"))?;

    tracing::debug!(status = body.status(), "Streaming response body");
    body.stream_to(&mut io::stdout().lock())
        .context("Failed to read response body")?;
    Ok(())
}
