//! # Prospect Configuration Validator
//!
//! Command-line tool for validating Prospect Core configuration files across
//! environments, and for printing the tier cache policies and circuit breaker
//! settings a deployment would run with.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prospect_core::config::{ConfigManager, ProspectConfig};
use prospect_core::tier::{Tier, TierPolicyResolver};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Prospect Core configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the resolved configuration as JSON instead of a report
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate all configuration components
    All,

    /// Validate a specific configuration component
    Component {
        /// Component name (database, cache, tiers, circuit_breakers, downstream, usage_ledger)
        name: String,
    },

    /// List environments with an override file
    Environments,

    /// Show the cache policy each tier resolves to, including env TTL overrides
    Tiers,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Environments) => list_environments(&cli),
        Some(Commands::Tiers) => show_tiers(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {:#}", e);
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<ProspectConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for environment '{}'", cli.environment))?;
    Ok(manager.config().clone())
}

fn config_dir(cli: &Cli) -> PathBuf {
    cli.config_dir.clone().unwrap_or_else(|| PathBuf::from("config"))
}

fn validate_all_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    if cli.json {
        let sanitized = ConfigManager::sanitize_config_for_logging(&config);
        println!("{}", serde_json::to_string_pretty(&sanitized)?);
        return Ok(());
    }

    println!("🔧 Validating Prospect Configuration");
    println!("Environment: {}", cli.environment);
    println!("Config Directory: {}", config_dir(cli).display());
    println!();
    println!("✅ Configuration loaded and validated");

    validate_database_config(&config);
    validate_cache_config(&config);
    validate_tiers_config(&config);
    validate_circuit_breakers_config(&config);
    validate_downstream_config(&config);
    validate_usage_ledger_config(&config);

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(cli: &Cli, component_name: &str) -> Result<()> {
    let config = load_config(cli)?;

    match component_name.to_lowercase().replace('-', "_").as_str() {
        "database" => validate_database_config(&config),
        "cache" => validate_cache_config(&config),
        "tiers" => validate_tiers_config(&config),
        "circuit_breakers" => validate_circuit_breakers_config(&config),
        "downstream" => validate_downstream_config(&config),
        "usage_ledger" => validate_usage_ledger_config(&config),
        other => bail!("Unknown component: {}", other),
    }

    println!("✅ Component '{}' validation passed!", component_name);
    Ok(())
}

fn list_environments(cli: &Cli) -> Result<()> {
    let dir = config_dir(cli);
    println!("📋 Available Environments ({}):", dir.display());

    let mut environments: Vec<String> = std::fs::read_dir(&dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_prefix("prospect-config.")
                .and_then(|rest| rest.strip_suffix(".yaml"))
                .map(str::to_string)
        })
        .collect();
    environments.sort();

    println!("  • development (base file only)");
    for env in environments {
        println!("  • {}", env);
    }

    Ok(())
}

fn show_tiers(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let resolver = TierPolicyResolver::from_config(&config.tiers);

    if cli.json {
        let policies: Vec<_> = Tier::ALL.iter().map(|t| resolver.resolve_tier(*t)).collect();
        println!("{}", serde_json::to_string_pretty(&policies)?);
        return Ok(());
    }

    println!("🏷️  Tier Cache Policies (env prefix {}):", config.tiers.ttl_env_prefix);
    println!("   {:<14} {:<16} {:>12} {:>11}", "tier", "strategy", "ttl_seconds", "force_live");
    for tier in Tier::ALL {
        let policy = resolver.resolve_tier(tier);
        println!(
            "   {:<14} {:<16} {:>12} {:>11}",
            policy.tier.as_str(),
            policy.strategy.as_str(),
            policy.ttl_seconds,
            policy.force_live_lookup
        );
    }
    Ok(())
}

// Component reports. Structural validation already ran in ProspectConfig::validate.

fn validate_database_config(config: &ProspectConfig) {
    println!("🗄️  Database Configuration...");

    if !config.uses_database() {
        println!("   ℹ️  No component uses Postgres; database settings are unused");
        return;
    }

    if config.database.url.is_some() {
        println!("   ✅ Database URL configured");
    } else {
        println!(
            "   ✅ Database {}@{}:{}/{}",
            config.database.username, config.database.host, config.database.port, config.database.database
        );
    }
    println!(
        "   ✅ Pool: max {} connections, acquire timeout {}s, migrations {}",
        config.database.max_connections,
        config.database.acquire_timeout_seconds,
        if config.database.run_migrations { "on" } else { "off" }
    );
}

fn validate_cache_config(config: &ProspectConfig) {
    println!("📦 Cache Configuration...");

    if !config.cache.enabled {
        println!("   ℹ️  Cache disabled, every lookup is a miss");
        return;
    }

    println!("   ✅ Backend: {}", config.cache.backend);
    println!("   ✅ Key format version: {}", config.cache.format_version);
    match config.cache.min_store_interval() {
        Some(interval) => println!("   ✅ Min store interval: {}s", interval.as_secs()),
        None => println!("   ℹ️  Min store interval disabled"),
    }
}

fn validate_tiers_config(config: &ProspectConfig) {
    println!("🏷️  Tier Configuration...");

    let resolver = TierPolicyResolver::from_config(&config.tiers);
    for tier in Tier::ALL {
        let policy = resolver.resolve_tier(tier);
        println!(
            "   ✅ {}: {} for {}s",
            tier,
            policy.strategy.as_str(),
            policy.ttl_seconds
        );
    }
}

fn validate_circuit_breakers_config(config: &ProspectConfig) {
    println!("🔌 Circuit Breakers Configuration...");

    if !config.circuit_breakers.enabled {
        println!("   ℹ️  Circuit breakers disabled");
        return;
    }

    let defaults = &config.circuit_breakers.default_config;
    println!(
        "   ✅ Default: open after {} failures, cooldown {}ms",
        defaults.failure_threshold, defaults.cooldown_ms
    );

    let mut services: Vec<_> = config.circuit_breakers.component_configs.iter().collect();
    services.sort_by_key(|(name, _)| name.as_str());
    for (name, component) in services {
        println!(
            "   ✅ {}: open after {} failures, cooldown {}ms",
            name, component.failure_threshold, component.cooldown_ms
        );
    }
}

fn validate_downstream_config(config: &ProspectConfig) {
    println!("🌐 Downstream Call Budget...");
    println!(
        "   ✅ Timeout {}ms, {} attempt(s), backoff {}ms..{}ms",
        config.downstream.timeout_ms,
        config.downstream.max_attempts,
        config.downstream.backoff_base_ms,
        config.downstream.backoff_max_ms
    );
}

fn validate_usage_ledger_config(config: &ProspectConfig) {
    println!("🧾 Usage Ledger Configuration...");

    if !config.usage_ledger.enabled {
        println!("   ℹ️  Usage ledger disabled");
        return;
    }

    println!("   ✅ Sink: {}", config.usage_ledger.sink);
    println!(
        "   ✅ Channel capacity {}, shutdown drain {}ms",
        config.usage_ledger.channel_capacity, config.usage_ledger.shutdown_timeout_ms
    );
}
