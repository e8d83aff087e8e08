//! Standalone realm server binary.
//!
//! Usage:
//!   cargo run -p realm_server -- [--addr 127.0.0.1:8484] [--version 1] [--idle-timeout 300]
//!
//! The server accepts client connections, terminates the enciphered framed
//! protocol, and maintains per-map world state and delegated mob control.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use realm_server::RealmServer;
use realm_shared::config::RealmConfig;
use tracing::info;

fn parse_args() -> RealmConfig {
    let mut cfg = RealmConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--version" if i + 1 < args.len() => {
                cfg.version = args[i + 1].parse().unwrap_or(cfg.version);
                i += 2;
            }
            "--idle-timeout" if i + 1 < args.len() => {
                cfg.idle_timeout_secs = args[i + 1].parse().unwrap_or(cfg.idle_timeout_secs);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, version = cfg.version, "starting realm server");

    let server = Arc::new(RealmServer::bind(cfg).await.context("bind server")?);
    server.run().await
}
