use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replay_bts::config::RunConfig;
use replay_bts::data::load_csv;
use replay_bts::download::{BinanceDownloader, Interval, parse_date};
use replay_bts::engine::Backtest;
use replay_bts::events::TracingObserver;
use replay_bts::server;
use replay_bts::store::{RedisStore, Repository};
use replay_bts::strategy::Strategy;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replay-bts")]
#[command(about = "Bar-replay backtests with take-profit / cancel orders.", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a CSV price file through the configured strategy.
    Run {
        /// TOML run configuration.
        #[arg(long)]
        config: PathBuf,
        /// Print the result without storing it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Download historical candles into a CSV file.
    Download {
        /// Pair, e.g. BTC/USDT.
        #[arg(long)]
        symbol: String,
        /// One of 1m, 3m, 5m, 15m, 30m, 1h.
        #[arg(long, default_value = "1h")]
        interval: Interval,
        /// First day, DD/MM/YYYY.
        #[arg(long)]
        from: String,
        /// Last day, DD/MM/YYYY.
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,
    },
    /// Serve stored results over HTTP.
    Serve {
        #[arg(long, default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Commands::Run { config, dry_run } => run(config, dry_run),
        Commands::Download {
            symbol,
            interval,
            from,
            to,
            out_dir,
        } => {
            let (from, to) = (parse_date(&from)?, parse_date(&to)?);
            anyhow::ensure!(from < to, "--from must be before --to");
            let path = BinanceDownloader::new()?.download(&symbol, interval, from, to, &out_dir)?;
            tracing::info!(path = %path.display(), "candles saved");
            Ok(())
        }
        Commands::Serve { redis_url, addr } => {
            let store = RedisStore::connect(&redis_url).with_context(|| format!("connecting to {redis_url}"))?;
            let repository = Arc::new(Repository::new(Arc::new(store)));
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(addr, repository))?;
            Ok(())
        }
    }
}

fn run(path: PathBuf, dry_run: bool) -> Result<()> {
    let config = RunConfig::from_file(&path).with_context(|| format!("reading {}", path.display()))?;
    let candles = load_csv(&config.data).with_context(|| format!("loading {}", config.data.display()))?;
    tracing::info!(candles = candles.len(), pair = %config.options.pair, "prices loaded");

    let mut strategy = config.strategy.build()?;
    let mut bts = Backtest::new(Arc::from(candles), &config.options)?.with_observer(TracingObserver);
    bts.run(&mut strategy)?;

    for order in bts.orders() {
        tracing::info!(
            id = order.id(),
            side = %order.side(),
            state = %order.state(),
            open_price = order.open_price(),
            amount = order.reserved_amount(),
            "order"
        );
    }

    let portfolio = bts.portfolio(strategy.name())?;
    println!("{portfolio}");

    match (&config.redis_url, dry_run) {
        (_, true) => tracing::info!("dry run, result not stored"),
        (None, false) => tracing::info!("no store configured, result not stored"),
        (Some(url), false) => {
            let store = RedisStore::connect(url).with_context(|| format!("connecting to {url}"))?;
            let stored = Repository::new(Arc::new(store)).save(&portfolio)?;
            println!("stored as {} (version {})", stored.id, stored.version);
        }
    }
    Ok(())
}
