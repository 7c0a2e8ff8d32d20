//! Gateway binary
//!
//! Loads the YAML configuration (path from the first argument, defaulting
//! to `config/gateway.yaml`) and serves the wire API.

use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use modelmux::{Config, Gateway};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/gateway.yaml".to_string());
    let config = if std::path::Path::new(&path).exists() {
        Config::from_file(&path).with_context(|| format!("loading {path}"))?
    } else {
        Config::default()
    };

    Gateway::new(config).run().await.context("gateway failed")
}
