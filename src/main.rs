//! FlashSnipe - Cross-Venue Flash-Loan Arbitrage Engine
//!
//! Run with: cargo run -- [--config flashsnipe.toml] [--mode simulation]
//!
//! One scanner task per configured chain:
//! - Cartographer: venue quotes → graph snapshot
//! - Brain: 2/3-hop cycles → scored opportunities
//! - Executor: execution slot → flash-loan plan → private relay bundle

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod brain;
mod cartographer;
mod config;
mod errors;
mod executor;
mod fixed;
mod gas_oracle;
mod ledger;
mod retry;
mod rpc;
mod scanner;
mod tokens;

use config::{Config, ExecutionMode};
use executor::ExecutionSlots;
use ledger::FeedbackLedger;
use scanner::ChainScanner;

#[derive(Debug, Parser)]
#[command(name = "flashsnipe", version, about = "Cross-venue flash-loan arbitrage engine")]
struct Cli {
    /// TOML config file; environment variables are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured execution mode (simulation, dry_run, production)
    #[arg(short, long)]
    mode: Option<ExecutionMode>,

    /// Run a single tick per chain and exit
    #[arg(long)]
    once: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

fn print_banner(mode: ExecutionMode) {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🎯 FLASHSNIPE - Cross-Venue Flash-Loan Arbitrage").cyan().bold()
    );
    println!(
        "{}",
        style("    Quote Graph | 2/3-Hop Cycles | Private Bundles").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    match mode {
        ExecutionMode::Simulation => println!("{}", style(" 📋 SIMULATION: nothing is signed").cyan()),
        ExecutionMode::DryRun => println!("{}", style(" 🧪 DRY RUN: bundles are relay-simulated, never sent").yellow()),
        ExecutionMode::Production => {
            println!("{}", style(" ⚠️  PRODUCTION: real transactions, real gas").red().bold())
        }
    }
    println!();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            dotenvy::dotenv().ok();
            Config::from_file(path).map_err(|e| eyre!("failed to load {}: {}", path.display(), e))?
        }
        None => Config::from_env()?,
    };
    if let Some(mode) = cli.mode {
        config.execution_mode = mode;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flashsnipe=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Some(path) = &cli.dump_config {
        config.save_to_file(path)?;
        println!("{} Configuration written to {}", style("✓").green(), path.display());
        return Ok(());
    }

    print_banner(config.execution_mode);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your config file or .env");
        return Err(e);
    }

    config.print_summary();
    println!();

    if config.emergency_stop {
        warn!("{}", style("🛑 Emergency stop is active: opportunities will be detected, never executed").red().bold());
    }

    let ledger = Arc::new(match &config.ledger_journal_path {
        Some(path) => FeedbackLedger::with_journal(path),
        None => FeedbackLedger::new(),
    });
    let slots = Arc::new(ExecutionSlots::new(config.slot_policy));
    let config = Arc::new(config);

    let mut scanners = Vec::new();
    for chain in &config.chains {
        match ChainScanner::connect(config.clone(), chain, ledger.clone(), slots.clone()) {
            Ok(scanner) => scanners.push(scanner),
            Err(e) => error!("{} Chain {} ({}) not started: {}", style("✗").red(), chain.chain_id, chain.name, e),
        }
    }
    if scanners.is_empty() {
        return Err(eyre!("no chain could be started"));
    }

    if cli.once {
        for mut scanner in scanners {
            match scanner.tick().await {
                Ok(stats) => info!(
                    "{} Chain {}: {} viable of {} candidates",
                    style("✓").green(),
                    scanner.chain_id(),
                    stats.viable,
                    stats.candidates
                ),
                Err(e) => error!("{} Chain {}: {}", style("✗").red(), scanner.chain_id(), e),
            }
        }
        info!("📒 Ledger: {} entries, realized {}", ledger.len(), ledger.total_realized());
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles: Vec<_> = scanners
        .into_iter()
        .map(|scanner| tokio::spawn(scanner.run(shutdown_rx.clone())))
        .collect();

    tokio::signal::ctrl_c().await?;
    println!();
    info!("{}", style("Shutting down...").yellow());
    shutdown_tx.send(true).ok();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Scanner task failed: {}", e);
        }
    }

    info!("📒 Ledger: {} entries, realized {}", ledger.len(), ledger.total_realized());
    Ok(())
}
