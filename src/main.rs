//! `mm-engine-rs` CLI — spec §6. A thin composition root that loads
//! configuration, wires the out-of-scope collaborators (exchange
//! session, ledger store, rate lookup, notifier) and drives the
//! library's `LifecycleCoordinator`. Exit codes: 0 success, 2 config
//! error, 3 ledger corruption, 4 exchange auth failure, 1 any other
//! fatal error.

use chrono::Utc;
use clap::{Parser, Subcommand};
use mm_engine_rs::config::EngineConfig;
use mm_engine_rs::error::EngineError;
use mm_engine_rs::exchange::LiveExchange;
use mm_engine_rs::lifecycle::LifecycleCoordinator;
use mm_engine_rs::notify::LogNotifier;
use mm_engine_rs::persistence::FileLedgerStore;
use mm_engine_rs::rates::{EurUsdRates, StaticEurUsdRates};
use mm_engine_rs::report;
use mm_engine_rs::tax_agent::TaxAgentConfig;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mm-engine-rs", about = "Single-venue spot market maker with a FIFO tax ledger")]
struct Cli {
    /// Path to the TOML config file (defaults baked in if absent).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine: connect, reconcile, and begin ticking.
    Run,
    /// Replay a CSV of historical ticks (out of scope — see SPEC_FULL.md §11).
    Backtest {
        #[arg(long)]
        data: PathBuf,
    },
    /// Interactive setup wizard (out of scope — see SPEC_FULL.md §1).
    Setup,
    /// Emit the Anlage SO tax report for a given year.
    Report {
        #[arg(long)]
        year: i32,
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(err) => return fail(err),
    };

    let result = match cli.command {
        Command::Run => run(config).await,
        Command::Backtest { data } => backtest(data),
        Command::Setup => setup(),
        Command::Report { year, format } => report_cmd(config, year, &format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(err),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig, EngineError> {
    let config = match path {
        Some(p) => EngineConfig::load_from_file(p)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn fail(err: EngineError) -> ExitCode {
    log::error!("{err}");
    ExitCode::from(err.exit_code() as u8)
}

/// §6 "Environment inputs": API key and secret, ledger file path, data
/// directory, optional metrics port. None are persisted to disk by the
/// core.
fn live_exchange_from_env() -> Result<LiveExchange, EngineError> {
    let api_key = std::env::var("MM_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("MM_API_SECRET").unwrap_or_default();
    let ws_url = std::env::var("MM_WS_URL").unwrap_or_else(|_| "wss://exchange.invalid/ws".to_string());
    let url = url::Url::parse(&ws_url).map_err(|e| EngineError::ConfigInvalid(format!("MM_WS_URL invalid: {e}")))?;
    Ok(LiveExchange::new(api_key, api_secret, url))
}

async fn run(config: EngineConfig) -> Result<(), EngineError> {
    let mut exchange = live_exchange_from_env()?;
    // The live wire protocol is an out-of-scope collaborator
    // (SPEC_FULL.md §0); `connect` always reports why it cannot
    // proceed rather than silently no-opping, per §7's propagation
    // rule that global errors drain the engine via the lifecycle
    // coordinator's graceful-shutdown path.
    exchange.connect().await?;

    let store = FileLedgerStore::new(config.ledger_path.clone());
    let notifier = Box::new(LogNotifier);
    let starting_equity = dec!(0);
    let now = Utc::now();

    let mut coordinator = LifecycleCoordinator::new(config, exchange, store, notifier, starting_equity, now).await?;
    coordinator.connect_and_reconcile().await?;

    let mut shutdown = shutdown_signal();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                // Idle fallback wake per §4.12; a real deployment wakes
                // sooner on book/trade/fill events delivered through the
                // exchange collaborator's event stream.
                if let Err(err) = coordinator.tick(Utc::now()).await {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    if !err.is_expected_outcome() {
                        log::warn!("tick failed, will retry next cycle: {err}");
                    }
                }
            }
            _ = &mut shutdown => {
                log::info!("shutdown signal received, draining");
                coordinator.shutdown().await?;
                return Ok(());
            }
        }
    }
}

fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            sig.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    })
}

/// Backtest performance optimization and the replay harness itself are
/// explicit Non-goals (spec §1); this stub only validates the input
/// file exists so operators get a clear message instead of a silent
/// no-op.
fn backtest(data: PathBuf) -> Result<(), EngineError> {
    if !data.exists() {
        return Err(EngineError::ConfigInvalid(format!("backtest data file not found: {data:?}")));
    }
    log::error!(
        "backtest replay is an out-of-scope collaborator (SPEC_FULL.md §11); \
         mm-engine-rs only exposes the online trading engine as a library"
    );
    Err(EngineError::DeadlineExceeded("backtest harness not implemented in this engine build".to_string()))
}

/// Interactive setup wizard is out of scope (spec §1).
fn setup() -> Result<(), EngineError> {
    log::error!("interactive setup wizard is an out-of-scope collaborator (spec §1); edit the TOML config directly");
    Err(EngineError::DeadlineExceeded("setup wizard not implemented in this engine build".to_string()))
}

fn report_cmd(config: EngineConfig, year: i32, format: &str) -> Result<(), EngineError> {
    let holding_period = chrono::Duration::days(config.tax_agent.holding_period_days as i64);
    let doc = read_ledger_sync(&config.ledger_path)?;
    let ledger = match doc {
        Some(doc) => mm_engine_rs::ledger::FifoLedger::from_document(doc, holding_period),
        None => mm_engine_rs::ledger::FifoLedger::new(holding_period),
    };

    let tax_config: TaxAgentConfig = config.tax_agent.clone();
    match format {
        "csv" => {
            let rows = report::rows_for_year(&ledger, year);
            match report::to_csv(&rows) {
                Ok(csv) => println!("{csv}"),
                Err(e) => return Err(EngineError::ConfigInvalid(format!("csv encode error: {e}"))),
            }
        }
        "json" => {
            let rows = report::rows_for_year(&ledger, year);
            let json = report::to_json(&rows)?;
            println!("{json}");
        }
        _ => {
            println!("{}", report::to_text_summary(&ledger, year, &tax_config));
        }
    }
    Ok(())
}

fn read_ledger_sync(path: &std::path::Path) -> Result<Option<mm_engine_rs::ledger::LedgerDocument>, EngineError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let doc = serde_json::from_str(&contents)
        .map_err(|e| EngineError::LedgerCorruption(format!("failed to parse ledger at {path:?}: {e}")))?;
    Ok(Some(doc))
}

#[allow(dead_code)]
async fn rate_for_today(rates: &dyn EurUsdRates) -> Option<rust_decimal::Decimal> {
    rates.rate_for(Utc::now().date_naive()).await
}

#[allow(dead_code)]
fn default_rate_source() -> StaticEurUsdRates {
    StaticEurUsdRates::constant(dec!(1.10))
}
