use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use udo_config::AppConfig;
use udo_knowledge::search::SearchOptions;
use udo_runtime::CoreContext;

#[derive(Debug, Parser)]
#[command(
    name = "udo",
    version,
    about = "Knowledge-sync and retrieval core for development activity"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Queue an event for debounced synchronization.
    Sync {
        event_type: String,
        /// Event payload as a JSON object.
        #[arg(long, default_value = "{}")]
        data: String,
        /// Bypass the debouncer and write one note immediately.
        #[arg(long)]
        now: bool,
    },
    /// Flush all pending events immediately.
    Flush,
    /// Search the knowledge vault.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        max_results: usize,
        #[arg(long)]
        error_type: Option<String>,
        #[arg(long, default_value_t = 5.0)]
        min_score: f64,
    },
    /// Attempt tier-1 resolution of an error message from past solutions.
    Resolve { error: String },
    /// Save an error resolution for future tier-1 lookups.
    SaveResolution {
        error: String,
        solution: String,
        /// Additional context as a JSON object.
        #[arg(long, default_value = "{}")]
        context: String,
    },
    /// List notes from the last N days.
    Recent {
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=30))]
        days: u32,
    },
    /// Show synchronization statistics.
    Stats,
    /// Report vault and queue health.
    Health,
    /// Run the coordinator in the foreground with the periodic backup loop.
    Watch,
}

fn parse_object(raw: &str, what: &str) -> Result<Map<String, Value>> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("{what} is not valid JSON"))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{what} must be a JSON object"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone())),
        )
        .init();

    let context = CoreContext::start(config);

    let outcome = run(&cli, &context).await;
    // Every exit path runs the terminal flush.
    let stopped = context.stop().await;
    outcome?;
    stopped
}

async fn run(cli: &Cli, context: &CoreContext) -> Result<()> {
    match &cli.command {
        Commands::Sync {
            event_type,
            data,
            now,
        } => {
            let data = parse_object(data, "--data")?;
            if *now {
                context.coordinator.sync_now(event_type, data).await?;
                println!("synced {event_type} immediately");
            } else {
                context.sync_event(event_type, data).await?;
                let pending = context.coordinator.pending_events().await;
                println!(
                    "queued {event_type} ({pending} pending, flushes within {}s)",
                    context.config.sync.debounce_window_secs
                );
            }
        }
        Commands::Flush => {
            let flushed = context.force_flush().await?;
            println!("flushed {flushed} pending event(s)");
        }
        Commands::Search {
            query,
            max_results,
            error_type,
            min_score,
        } => {
            let opts = SearchOptions {
                error_type: error_type.clone(),
                max_results: *max_results,
                min_score: *min_score,
                content_tier: true,
            };
            let results = context.search_knowledge(query, &opts);
            print_json(&results)?;
        }
        Commands::Resolve { error } => {
            let hit = context.resolve_error_tier1(error);
            match hit.solution {
                Some(solution) => {
                    println!("resolved in {:.1}ms:\n{solution}", hit.elapsed_ms)
                }
                None => println!(
                    "no past solution found in {:.1}ms — escalate to the next tier",
                    hit.elapsed_ms
                ),
            }
        }
        Commands::SaveResolution {
            error,
            solution,
            context: extra,
        } => {
            let extra = parse_object(extra, "--context")?;
            context.save_error_resolution(error, solution, extra).await?;
            let flushed = context.force_flush().await?;
            println!("resolution saved ({flushed} event(s) persisted)");
        }
        Commands::Recent { days } => {
            let notes = context.recent_notes(*days);
            print_json(&notes)?;
        }
        Commands::Stats => {
            let stats = context.sync_statistics().await;
            print_json(&stats)?;
        }
        Commands::Health => {
            let health = context.health().await;
            print_json(&health)?;
        }
        Commands::Watch => {
            context.start_periodic_backup();
            println!(
                "coordinator running (backup every {}h) — ctrl-c to stop",
                context.config.sync.backup_interval_hours
            );
            tokio::signal::ctrl_c().await?;
            println!("stopping — flushing pending events");
        }
    }
    Ok(())
}
