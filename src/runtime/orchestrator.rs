use anyhow::{Context, Result};
use colored::Colorize;

use crate::{
    app::{load_config, Config},
    cli::{handle_command, Cli, Commands},
};

use super::Services;

/// Main runtime orchestrator
pub struct Orchestrator {
    cli: Cli,
    config: Config,
}

impl Orchestrator {
    /// Create a new orchestrator from CLI args
    pub fn new(cli: Cli) -> Result<Self> {
        let config = match load_config(cli.config.as_deref()) {
            Ok(cfg) => cfg,
            // An explicitly named file must load
            Err(e) if cli.config.is_some() => return Err(e),
            Err(e) => {
                eprintln!("⚠️  Failed to load config: {:#}. Using defaults.", e);
                Config::default()
            }
        };

        Ok(Self { cli, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the orchestrator
    pub async fn run(self) -> Result<()> {
        let command = self.cli.command.clone().unwrap_or(Commands::Run);
        if handle_command(&command, &self.config, self.cli.output_format).await? {
            return Ok(());
        }

        let services = Services::new(self.config.clone());
        let report = services
            .startup()
            .await
            .context("Failed to start diagnostics services")?;

        let features = self.config.enabled_features();
        if features.is_empty() {
            println!("🔭 lookingglass running with no features enabled");
        } else {
            println!("🔭 lookingglass running: {}", features.join(", ").green());
        }
        if !report.missing_tools.is_empty() {
            println!(
                "⚠️  Missing tools: {}",
                report.missing_tools.join(", ").yellow()
            );
        }
        println!("   Press Ctrl-C to stop");

        let waited = tokio::signal::ctrl_c().await;

        // Tear down before reporting any signal error so no helper outlives us
        let shutdown = services.shutdown().await;
        println!(
            "🛑 Stopped ({} session(s) terminated)",
            shutdown.sessions_stopped
        );

        waited.context("Failed to listen for Ctrl-C")
    }
}
