use anyhow::{Context, Result};
use colored::Colorize;
use std::time::Duration;

use crate::{
    app::{get_config_dir, init_config, Config},
    runtime::Services,
    tools::{check_requirements, ToolStatus},
};

use super::{Commands, OutputFormat};

/// Handle CLI subcommands. Returns false when the caller should go on to
/// run the services.
pub async fn handle_command(
    command: &Commands,
    config: &Config,
    format: OutputFormat,
) -> Result<bool> {
    match command {
        Commands::Init => {
            println!("Initializing lookingglass configuration...");
            let path = init_config()?;
            println!("Configuration written to {}", path.display());
            Ok(true)
        }
        Commands::Version => {
            show_version();
            Ok(true)
        }
        Commands::Status => {
            show_status(config, format)?;
            Ok(true)
        }
        Commands::Check => {
            run_check(config, format)?;
            Ok(true)
        }
        Commands::Stats { seconds } => {
            show_stats(config, Duration::from_secs(*seconds)).await?;
            Ok(true)
        }
        Commands::Run => Ok(false),
    }
}

/// Show version information
pub fn show_version() {
    println!("lookingglass v{}", env!("CARGO_PKG_VERSION"));
    println!("   Cached queries, bandwidth telemetry and iperf3 sessions for a looking glass");
}

fn print_tools(statuses: &[ToolStatus]) {
    for tool in statuses {
        match &tool.path {
            Some(path) => println!("  {} {}: {}", "[OK]".green(), tool.name, path.display()),
            None => println!(
                "  {} {}: not found ({})",
                "[MISSING]".yellow(),
                tool.name,
                tool.description
            ),
        }
    }
}

/// Show configured features and which tools are installed
fn show_status(config: &Config, format: OutputFormat) -> Result<()> {
    let tools = check_requirements(&config.network_tools.iperf3_binary);

    if format == OutputFormat::Json {
        let status = serde_json::json!({
            "enabled": config.enabled,
            "features": config.enabled_features(),
            "tools": tools,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "lookingglass status:".bold());
    println!();

    if config.enabled {
        println!("  {} Diagnostics: enabled", "[OK]".green());
    } else {
        println!("  {} Diagnostics: disabled", "[WARNING]".yellow());
    }
    let features = config.enabled_features();
    if features.is_empty() {
        println!("  Features: none");
    } else {
        println!("  Features: {}", features.join(", ").cyan());
    }

    let cache = &config.cache;
    println!(
        "  Cache: {}s TTL, prefix {}, on store failure: {:?}",
        cache.timeout_secs, cache.key_prefix, cache.on_unavailable
    );

    let bandwidth = &config.bandwidth;
    println!(
        "  Bandwidth: every {}s, {} samples kept, {} exposed",
        bandwidth.update_interval, bandwidth.history_length, bandwidth.exposed_history
    );

    let (start, end) = config.network_tools.iperf3_port_range;
    println!("  iperf3 ports: {}-{}", start, end);

    match get_config_dir() {
        Ok(dir) => {
            let path = dir.join("config.toml");
            if path.exists() {
                println!("  {} Configuration: {}", "[OK]".green(), path.display());
            } else {
                println!("  {} Configuration: not found (using defaults)", "[WARNING]".yellow());
            }
        }
        Err(e) => println!("  {} Configuration: {}", "[ERROR]".red(), e),
    }

    println!("\n  Tools:");
    print_tools(&tools);
    println!();
    Ok(())
}

/// Validate configuration and look for required tools.
/// Fails only on invalid configuration; missing tools are warnings.
fn run_check(config: &Config, format: OutputFormat) -> Result<()> {
    let errors = config.validate();
    let tools = check_requirements(&config.network_tools.iperf3_binary);

    if format == OutputFormat::Json {
        let report = serde_json::json!({
            "valid": errors.is_empty(),
            "errors": errors,
            "tools": tools,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if errors.is_empty() {
            println!("{} Configuration is valid", "[OK]".green());
        } else {
            println!("{} Configuration has {} problem(s):", "[ERROR]".red(), errors.len());
            for error in &errors {
                println!("  • {}", error);
            }
        }
        println!();
        print_tools(&tools);
    }

    if !errors.is_empty() {
        anyhow::bail!("Configuration validation failed");
    }
    Ok(())
}

/// Run the sampler for `duration` and print what it collected
async fn show_stats(config: &Config, duration: Duration) -> Result<()> {
    let services = Services::new(config.clone());
    let sampler = services.sampler();

    eprintln!("Sampling interfaces for {}s...", duration.as_secs());
    sampler.start().await;
    tokio::time::sleep(duration).await;
    let snapshot = sampler.snapshot();
    services.shutdown().await;

    let json =
        serde_json::to_string_pretty(&*snapshot).context("Failed to serialize bandwidth snapshot")?;
    println!("{}", json);
    Ok(())
}
