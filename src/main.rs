use aggregator::BarAggregator;
use anyhow::{Context, Result};
use api_client::PaperBroker;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use configuration::{Config, LoggingConfig};
use core_types::Quote;
use database::{DbRepository, InMemoryStateStore, StrategyStateStore};
use engine::StrategyManager;
use events::{EventSink, WsMessage};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Real-time bar aggregation and strategy scheduling for futures paper trading.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file. Missing files fall back to defaults.
    #[arg(long, short, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate JSON-line quotes from stdin and run the enabled strategies.
    Run,
    /// Show the registered strategies with their persisted state.
    Strategies,
}

/// Capacity of the in-process event bus.
const EVENT_BUS_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = configuration::load_config_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let _log_guard = init_tracing(&config.logging)?;

    match cli.command {
        Commands::Run => handle_run(config).await,
        Commands::Strategies => handle_strategies(config).await,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_writer(std::io::stderr);

    let Some(directory) = &logging.directory else {
        tracing_subscriber::registry().with(filter).with(console).try_init()?;
        return Ok(None);
    };

    let prefix = logging.file_prefix.as_deref().unwrap_or("meridian.log");
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix));
    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()?;
    Ok(Some(guard))
}

/// Postgres when `DATABASE_URL` is set and reachable, process memory otherwise.
async fn open_store() -> Arc<dyn StrategyStateStore> {
    if std::env::var("DATABASE_URL").is_err() {
        info!("DATABASE_URL not set, strategy state is kept in memory");
        return Arc::new(InMemoryStateStore::default());
    }
    let pool = match database::connect().await {
        Ok(pool) => pool,
        Err(e) => {
            warn!(error = %e, "Database unavailable, strategy state is kept in memory");
            return Arc::new(InMemoryStateStore::default());
        }
    };
    if let Err(e) = database::run_migrations(&pool).await {
        warn!(error = %e, "Migrations failed, strategy state is kept in memory");
        return Arc::new(InMemoryStateStore::default());
    }
    info!("Strategy state is persisted to Postgres");
    Arc::new(DbRepository::new(pool))
}

async fn build_manager(
    config: &Config,
    broker: Arc<PaperBroker>,
    events: Option<Arc<dyn EventSink>>,
) -> StrategyManager {
    let manager = StrategyManager::new(config, open_store().await, events);
    for (name, factory) in strategies::builtin_factories(&config.params, broker) {
        manager.register_strategy(name, factory).await;
    }
    let loaded = manager.load_strategies().await;
    info!(loaded, "Strategies loaded");
    manager
}

async fn handle_run(config: Config) -> Result<()> {
    let (bus, _) = broadcast::channel::<WsMessage>(EVENT_BUS_CAPACITY);
    let sink: Arc<dyn EventSink> = Arc::new(bus.clone());

    let aggregator = BarAggregator::new(&config.aggregator, Some(Arc::clone(&sink)));
    aggregator.start();

    let broker = Arc::new(PaperBroker::new(
        config.manager.account_id.clone(),
        config.paper.clone(),
    ));
    let follower = tokio::spawn({
        let broker = Arc::clone(&broker);
        let rx = bus.subscribe();
        async move { broker.follow(rx).await }
    });

    let manager = build_manager(&config, broker, Some(sink)).await;
    for (name, result) in manager.apply_persisted_states().await {
        match result {
            Ok(message) => info!(strategy = %name, "{message}"),
            Err(e) => warn!(strategy = %name, error = %e, "Persisted state not applied"),
        }
    }
    manager.start_auto_selection();

    info!("Reading quotes from stdin, Ctrl-C to stop");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => ingest(&aggregator, &line),
                Ok(None) => {
                    info!("Quote stream ended");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read quote stream");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    manager.shutdown().await;
    aggregator.stop().await;
    follower.abort();

    let totals = manager.get_aggregated_metrics().await;
    info!(
        trades = totals.total_trades,
        pnl = %totals.total_pnl,
        win_rate = %totals.win_rate,
        "Session totals"
    );
    Ok(())
}

fn ingest(aggregator: &BarAggregator, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Quote>(line) {
        Ok(quote) => aggregator.add_quote(&quote.symbol, quote.price, quote.volume, quote.timestamp),
        Err(e) => warn!(error = %e, line = %line, "Skipping malformed quote"),
    }
}

async fn handle_strategies(config: Config) -> Result<()> {
    let broker = Arc::new(PaperBroker::new(
        config.manager.account_id.clone(),
        config.paper.clone(),
    ));
    let manager = build_manager(&config, broker, None).await;

    let mut table = Table::new();
    table.set_header(vec![
        "Strategy", "Status", "Enabled", "Symbols", "Size", "Trades", "Win rate", "P&L", "Last started",
    ]);
    for s in manager.get_strategy_summaries().await {
        table.add_row(vec![
            s.name,
            s.status.to_string(),
            s.enabled.to_string(),
            s.symbols.join(","),
            s.position_size.to_string(),
            s.metrics.total_trades.to_string(),
            format!("{:.1}%", s.metrics.win_rate * Decimal::ONE_HUNDRED),
            s.metrics.total_pnl.to_string(),
            s.last_started
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
