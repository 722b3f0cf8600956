//! # policydata CLI
//!
//! Look up the reconciled policy record for a member, list strategies and
//! check configuration files.
//!
//! Each invocation builds its own service. Records are reused between runs
//! only when a cache directory is set (`cache_dir` in the config, or
//! `--cache-dir`); otherwise every run starts with an empty in-memory cache.
//!
//! Exit codes:
//! - `0` success
//! - `1` unexpected failure
//! - `2` usage error or unknown strategy
//! - `3` a provider failed or returned an invalid record
//! - `4` invalid configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use policydata_core::{MemberId, MemberIdError, StrategyRegistry};
use policydata_runtime::{
    ConfigError, PolicyDataError, PolicyDataRequest, PolicyDataService, RuntimeConfig,
};

#[derive(Parser, Debug)]
#[command(name = "policydata")]
#[command(about = "Fetch, reconcile and cache policy data from multiple providers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (YAML). Defaults apply without one.
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for the on-disk cache (overrides `cache_dir` in the config)
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Look up the reconciled policy record for one member
    Get {
        /// Member identifier (positive integer)
        #[arg(long, allow_hyphen_values = true)]
        member_id: Option<String>,

        /// Reconciliation strategy (default from config)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Skip the cache lookup and fetch fresh data. The result still
        /// replaces the cached entry.
        #[arg(long)]
        bust_cache: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// List registered reconciliation strategies
    Strategies,

    /// Validate a configuration file
    CheckConfig,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref(), cli.cache_dir)?;

    match cli.command {
        Commands::Get {
            member_id,
            strategy,
            bust_cache,
            format,
        } => {
            let member_id = MemberId::parse_optional(member_id.as_deref())?;
            if config.cache_dir.is_none() {
                tracing::debug!("No cache_dir set; cached records last for this run only");
            }
            let service = PolicyDataService::builder()
                .config(config)
                .build()
                .context("Failed to initialise policy data service")?;

            let mut request = PolicyDataRequest::new(member_id).bust_cache(bust_cache);
            if let Some(strategy) = strategy {
                request = request.with_strategy(strategy);
            }

            let response = service
                .policy_data(&request)
                .await
                .with_context(|| format!("Policy data lookup failed for member {member_id}"))?;
            tracing::debug!(
                member_id = %member_id,
                strategy = %response.strategy,
                origin = ?response.origin,
                "Lookup finished"
            );
            println!("{}", render(&response, format)?);
        }
        Commands::Strategies => {
            let registry = strategy_registry(&config)?;
            for line in strategy_lines(&registry) {
                println!("{line}");
            }
        }
        Commands::CheckConfig => {
            config.validate().context("Configuration is invalid")?;
            println!("Configuration OK");
            println!("  fetch_timeout: {:?}", config.fetch_timeout);
            println!("  cache_ttl: {:?}", config.cache_ttl);
            match &config.cache_dir {
                Some(dir) => println!("  cache_dir: {}", dir.display()),
                None => println!("  cache_dir: (in-memory, per run)"),
            }
            println!("  default_strategy: {}", config.default_strategy);
            for entry in &config.sources {
                let base_url = entry
                    .settings
                    .get("base_url")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(default)");
                println!("  source: {} {}", entry.source_type, base_url);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if cache_dir.is_some() {
        config.cache_dir = cache_dir;
        config
            .validate_limits()
            .context("Invalid --cache-dir")?;
    }
    tracing::debug!(
        path = ?path,
        sources = config.sources.len(),
        cache_dir = ?config.cache_dir,
        "Configuration loaded"
    );
    Ok(config)
}

fn strategy_registry(config: &RuntimeConfig) -> Result<StrategyRegistry> {
    let mut registry = StrategyRegistry::with_defaults();
    registry
        .set_default(&config.default_strategy)
        .map_err(|e| ConfigError::Validation(format!("default_strategy: {e}")))?;
    Ok(registry)
}

/// One line per strategy; the default is marked with `*`.
fn strategy_lines(registry: &StrategyRegistry) -> Vec<String> {
    registry
        .iter()
        .map(|strategy| {
            let marker = if strategy.name() == registry.default_name() {
                "*"
            } else {
                " "
            };
            format!("{marker} {:<20} {}", strategy.name(), strategy.description())
        })
        .collect()
}

fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

/// Map a failure onto the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<MemberIdError>().is_some() {
        return 2;
    }
    if let Some(e) = err.downcast_ref::<PolicyDataError>() {
        return match e.code() {
            "unknown_strategy" => 2,
            "fetch_failed" | "invalid_record_shape" => 3,
            _ => 1,
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return 4;
    }
    1
}
