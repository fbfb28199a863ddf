use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vipharvest::config::Config;
use vipharvest::crawler::PageNavigator;
use vipharvest::driver::SessionManager;
use vipharvest::error::{DomainError, Error};
use vipharvest::harvest::{HarvestGate, HarvestOrchestrator, HarvestOutcome};
use vipharvest::progress::{spawn_progress_consumer, LogSink, ProgressPublisher};
use vipharvest::scheduler::{BatchConfig, BatchScheduler};
use vipharvest::storage::{LinkStore, SharedLinkStore};

#[derive(Parser)]
#[command(
    name = "vipharvest",
    version,
    about = "Harvest private-server invite links with a headless browser",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one harvest pass for a game
    ///
    /// One-shot runs are not cooldown-gated; use `serve` for that.
    Harvest {
        /// Game identifier
        #[arg(short, long)]
        game: String,

        /// Requesting user
        #[arg(short, long)]
        user: String,

        /// Stop after this many new links (0 = all candidates)
        #[arg(short = 'n', long, default_value = "0")]
        count: usize,
    },

    /// Answer harvest requests from stdin, one `<user> <game> [count]` per line
    ///
    /// Each user may harvest once per cooldown TTL for as long as this runs.
    Serve,

    /// Harvest in rounds across one or two games toward a target
    Batch {
        /// First game identifier
        #[arg(short, long)]
        game: String,

        /// Optional second game identifier
        #[arg(long)]
        game2: Option<String>,

        /// Requesting user
        #[arg(short, long)]
        user: String,

        /// Links to collect in total
        #[arg(short, long)]
        target: usize,
    },

    /// List stored links
    Links {
        /// Only this user's links
        #[arg(short, long)]
        user: Option<String>,

        /// Only this game's links
        #[arg(short, long)]
        game: Option<String>,
    },

    /// Pick a random stored link
    Random {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        game: String,
    },

    /// Toggle a game in the user's favorites
    Favorite {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        game: String,
    },

    /// Reserve a stored link
    Reserve {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        game: String,

        #[arg(short, long)]
        link: String,
    },

    /// Show harvesting statistics
    Stats {
        /// Include a per-user summary
        #[arg(short, long)]
        user: Option<String>,

        /// Also print this process's Prometheus metrics
        #[arg(long)]
        metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = vipharvest::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    tracing::info!("vipharvest starting");

    let store = LinkStore::open(&config.storage.path)
        .with_context(|| format!("Failed to open link store {}", config.storage.path.display()))?
        .shared();

    let result = match cli.command {
        Commands::Harvest { game, user, count } => {
            tracing::info!(game = %game, user = %user, count, "Starting harvest command");
            harvest(&config, store, &game, &user, count).await
        }
        Commands::Serve => serve(&config, store).await,
        Commands::Batch {
            game,
            game2,
            user,
            target,
        } => {
            let games: Vec<String> = std::iter::once(game).chain(game2).collect();
            tracing::info!(games = ?games, user = %user, target, "Starting batch command");
            batch(&config, store, &games, &user, target).await
        }
        Commands::Links { user, game } => links(store, user.as_deref(), game.as_deref()).await,
        Commands::Random { user, game } => random(store, &user, &game).await,
        Commands::Favorite { user, game } => favorite(store, &user, &game).await,
        Commands::Reserve { user, game, link } => reserve(store, &user, &game, &link).await,
        Commands::Stats { user, metrics } => stats(store, user.as_deref(), metrics).await,
    };

    if let Err(e) = result {
        tracing::error!(
            category = ?e.category(),
            recoverable = e.is_recoverable(),
            error = %e,
            "Command failed"
        );
        anyhow::bail!(e.user_message());
    }

    tracing::info!("vipharvest completed successfully");
    Ok(())
}

/// Setup tracing subscriber
fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("vipharvest=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("vipharvest={level},warn"))
        })
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn build_orchestrator(
    config: &Config,
    store: SharedLinkStore,
) -> Result<HarvestOrchestrator, Error> {
    let sessions = Arc::new(SessionManager::chrome(config.driver.clone()));
    let navigator = Arc::new(PageNavigator::new(config.crawler.clone())?);
    Ok(HarvestOrchestrator::new(sessions, navigator, store))
}

async fn harvest(
    config: &Config,
    store: SharedLinkStore,
    game: &str,
    user: &str,
    count: usize,
) -> Result<(), Error> {
    let orchestrator = build_orchestrator(config, store)?;
    let outcome = orchestrator.run(game, user, count).await?;
    print_outcome(&outcome);
    Ok(())
}

async fn serve(config: &Config, store: SharedLinkStore) -> Result<(), Error> {
    let orchestrator = Arc::new(build_orchestrator(config, store)?);
    let gate = HarvestGate::new(orchestrator, config.cooldown.ttl_minutes);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!(ttl_minutes = config.cooldown.ttl_minutes, "Serving harvest requests");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                break;
            }
        };
        let Some(line) = line else { break };

        let parts: Vec<&str> = line.split_whitespace().collect();
        let (user, game, count) = match parts.as_slice() {
            [] => continue,
            [user, game] => (*user, *game, 0),
            [user, game, count] => match count.parse::<usize>() {
                Ok(count) => (*user, *game, count),
                Err(_) => {
                    println!("error: bad count {count:?}");
                    continue;
                }
            },
            _ => {
                println!("error: expected <user> <game> [count]");
                continue;
            }
        };

        match gate.request(game, user, count).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => {
                tracing::warn!(user = %user, game = %game, error = %e, "Request failed");
                println!("error: {}", e.user_message());
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &HarvestOutcome) {
    println!(
        "{} new link(s) for {} ({}), {} candidate(s) processed in {:.1}s",
        outcome.new_links_count,
        outcome.game_metadata.game_name,
        outcome.game_metadata.category,
        outcome.processed_count,
        outcome.duration_ms as f64 / 1000.0
    );
    for link in &outcome.new_links {
        println!("  {link}");
    }
    if !outcome.persisted {
        println!("warning: links could not be saved to disk");
    }
}

async fn batch(
    config: &Config,
    store: SharedLinkStore,
    games: &[String],
    user: &str,
    target: usize,
) -> Result<(), Error> {
    let orchestrator = Arc::new(build_orchestrator(config, store)?);

    let (publisher, rx) = ProgressPublisher::new();
    let consumer = spawn_progress_consumer(rx, Arc::new(LogSink), Duration::from_secs(5));

    let scheduler = BatchScheduler::new(orchestrator, BatchConfig::from(&config.batch))
        .with_progress(publisher);
    let report = scheduler.run_batches(games, user, target).await;
    drop(scheduler);
    if let Err(e) = consumer.await {
        tracing::debug!(error = %e, "Progress consumer ended abnormally");
    }
    let report = report?;

    println!(
        "Collected {}/{} link(s) in {} round(s), {} cooldown(s)",
        report.collected_links.len(),
        target,
        report.rounds_run,
        report.cooldowns_applied
    );
    for round in report.rounds_log.iter().filter(|r| r.error.is_some()) {
        println!(
            "  round {} game {}: {}",
            round.round,
            round.game_id,
            round.error.as_deref().unwrap_or_default()
        );
    }
    for link in &report.collected_links {
        println!("{link}");
    }
    Ok(())
}

async fn links(
    store: SharedLinkStore,
    user: Option<&str>,
    game: Option<&str>,
) -> Result<(), Error> {
    let links = store.lock().await.get_all(user, game);
    for link in &links {
        println!("{link}");
    }
    tracing::info!(count = links.len(), "Listed links");
    Ok(())
}

async fn random(store: SharedLinkStore, user: &str, game: &str) -> Result<(), Error> {
    let mut store = store.lock().await;
    let (link, record) = store.get_random(user, game);
    let Some(link) = link else {
        println!("No links stored for game {game}");
        return Ok(());
    };

    println!("{link}");
    if let Some(record) = record {
        println!(
            "  server {} ({}) found {}",
            record.server_info.server_id,
            record.server_info.page_title,
            record.discovered_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    store.record_usage(user, game, &link, "get_random");
    store.persist();
    Ok(())
}

async fn favorite(store: SharedLinkStore, user: &str, game: &str) -> Result<(), Error> {
    let mut store = store.lock().await;
    let added = store.toggle_favorite(user, game);
    store.persist();
    println!("{} {game}", if added { "added" } else { "removed" });
    for (category, games) in store.favorites_by_category(user) {
        println!("  {category}: {}", games.join(", "));
    }
    Ok(())
}

async fn reserve(store: SharedLinkStore, user: &str, game: &str, link: &str) -> Result<(), Error> {
    let mut store = store.lock().await;
    if store.reserve_server(user, game, link)? {
        store.persist();
        println!("reserved");
    } else {
        println!("already reserved");
    }
    Ok(())
}

async fn stats(store: SharedLinkStore, user: Option<&str>, metrics: bool) -> Result<(), Error> {
    let store = store.lock().await;
    println!("{}", serde_json::to_string_pretty(store.stats())?);
    println!("total links: {}", store.total_count());
    println!("success rate: {:.1}%", store.stats().success_rate() * 100.0);
    if let Some(user) = user {
        println!("{}", serde_json::to_string_pretty(&store.user_summary(user))?);
    }
    if metrics {
        let text = vipharvest::metrics::gather_metrics()
            .map_err(|e| Error::other(format!("Failed to render metrics: {e}")))?;
        print!("{text}");
    }
    Ok(())
}
