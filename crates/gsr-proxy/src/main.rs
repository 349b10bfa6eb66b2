//! Standalone host for the GameSpy replacement.
//!
//! Attaches the proxy outside the game, prints the backend configuration it
//! loaded, and keeps it running until Enter is pressed.  No exports are
//! hooked.  Useful for checking a configuration file and watching the
//! backend's logs without starting the game.

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gsr_core::Role;
use gsr_proxy::infrastructure::logging;
use gsr_proxy::infrastructure::proxy::{ProxyFacade, ProxyOptions};
use gsr_proxy::infrastructure::storage::DEFAULT_CONFIG_FILE;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// GameSpy replacement standalone host.
#[derive(Debug, Parser)]
#[command(
    name = "gsr-standalone",
    about = "Runs the GameSpy replacement backend outside the game",
    version
)]
struct Cli {
    /// Configuration file; created with defaults if missing.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, env = "GSR_CONFIG")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info", env = "GSR_LOG_LEVEL")]
    log_level: String,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_stderr(&cli.log_level);

    let options = ProxyOptions {
        config_path: cli.config.clone(),
        log_path: None,
        // Nothing to redirect outside the game.
        exports: Vec::new(),
        ..ProxyOptions::default()
    };
    let facade = ProxyFacade::attach(&options)
        .with_context(|| format!("failed to attach with {}", cli.config.display()))?;

    let config = facade.config();
    println!("GameSpy replacement running");
    println!("  config : {}", cli.config.display());
    println!("  backend: {}", config.backend);
    for role in Role::ALL {
        println!("  {:<7}: {}", role.as_str(), config.endpoint(role));
    }
    println!("Press Enter to stop.");

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read stdin")?;

    facade.detach();
    info!("standalone host stopped");
    Ok(())
}
