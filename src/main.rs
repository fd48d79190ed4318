//! Forward proxy binary.
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                FORWARD PROXY                 │
//!     Client             │  ┌──────────┐   ┌─────────┐   ┌───────────┐  │
//!     ───────────────────┼─▶│ listener │──▶│ handler │──▶│  forward  │──┼──▶ Origin
//!                        │  │ per-IP   │   │ span/id │   │ pooled    │  │    (HTTP)
//!                        │  └──────────┘   └────┬────┘   │ client    │  │
//!                        │                      │        └───────────┘  │
//!                        │                      ▼ CONNECT               │
//!                        │                 ┌─────────┐                  │
//!                        │                 │ tunnel  │──────────────────┼──▶ Origin
//!                        │                 │ relay   │                  │    (TCP)
//!                        │                 └─────────┘                  │
//!                        │  config · logging · metrics · lifecycle      │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use forward_proxy::config::load_config;
use forward_proxy::lifecycle::startup;
use forward_proxy::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "forward-proxy", version)]
#[command(about = "HTTP/1.1 forward proxy with CONNECT tunneling", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_logging(&config.observability) {
        eprintln!("Error: {err}");
        return ExitCode::FAILURE;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "forward-proxy starting");

    match startup::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Proxy exited with error");
            ExitCode::FAILURE
        }
    }
}
