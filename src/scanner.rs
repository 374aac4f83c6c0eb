//! Chain Scanner
//!
//! One scanner per configured chain, each on its own task. A tick runs the
//! whole pipeline once:
//!
//! 1. Collect quotes from every venue (bounded, per-venue timeouts)
//! 2. Publish a fresh graph snapshot
//! 3. Search cycles, score them, keep the Viable ones
//! 4. Hand Viable opportunities to the execution engine, best net first
//!
//! A cross-cutting failure (every RPC endpoint down, no loan provider can
//! fund a trade) suspends the chain until its health check passes again.
//! Other chains keep running.

use console::style;
use eyre::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::brain::{log_candidates, Evaluator, EvaluatorConfig, Opportunity, OpportunityState, Path, PathFinder, ScoringContext};
use crate::cartographer::{collect_quotes, GraphSnapshot, OnChainFeed, PriceFeed, SnapshotStore, VenueRegistry};
use crate::config::{ChainConfig, Config, ExecutionMode};
use crate::errors::ArbResult;
use crate::executor::{
    ExecutionEngine, ExecutionPlanner, ExecutionResult, ExecutionSlots, FlashbotsRelay, LoanProviderBook,
    SubmissionConfig, SubmissionManager, TransactionSigner, WalletManager,
};
use crate::fixed::{Bps, Usd};
use crate::gas_oracle::GasOracle;
use crate::ledger::FeedbackLedger;
use crate::rpc::{ChainClient, RpcPool};
use crate::tokens::TokenRegistry;

/// Candidates scored per tick; the rest wait for the next snapshot
pub const MAX_CANDIDATES_PER_TICK: usize = 64;

/// Counters for one tick
#[derive(Debug, Clone, Default)]
pub struct TickStats {
    pub snapshot_version: u64,
    pub quotes: usize,
    pub failed_venues: usize,
    pub nodes: usize,
    pub edges: usize,
    pub candidates: usize,
    pub viable: usize,
    pub rejected: usize,
    pub executed: usize,
    pub succeeded: usize,
    pub elapsed: Duration,
}

/// Chain-specific collaborators, built from config or injected in tests
pub struct ScannerParts {
    pub client: Arc<dyn ChainClient>,
    pub feed: Arc<dyn PriceFeed>,
    pub tokens: Arc<TokenRegistry>,
    pub venues: Arc<VenueRegistry>,
    pub providers: Arc<LoanProviderBook>,
}

pub struct ChainScanner {
    chain_id: u64,
    name: String,
    config: Arc<Config>,
    client: Arc<dyn ChainClient>,
    feed: Arc<dyn PriceFeed>,
    tokens: Arc<TokenRegistry>,
    venues: Arc<VenueRegistry>,
    providers: Arc<LoanProviderBook>,
    store: SnapshotStore,
    path_finder: PathFinder,
    evaluator: Evaluator,
    gas: Arc<GasOracle>,
    ledger: Arc<FeedbackLedger>,
    engine: Arc<ExecutionEngine>,
}

impl ChainScanner {
    /// Build the scanner for `chain` against its live RPC endpoints. Outside
    /// Simulation mode the operator key must be present in the environment.
    pub fn connect(
        config: Arc<Config>,
        chain: &ChainConfig,
        ledger: Arc<FeedbackLedger>,
        slots: Arc<ExecutionSlots>,
    ) -> Result<Self> {
        let client: Arc<dyn ChainClient> =
            Arc::new(RpcPool::connect(chain.chain_id, &chain.rpc_urls, config.retry.clone())?);
        let tokens = Arc::new(TokenRegistry::from_config(chain));
        let venues = Arc::new(VenueRegistry::from_chain(chain)?);
        let providers = Arc::new(LoanProviderBook::from_chain(chain, &tokens));
        let feed: Arc<dyn PriceFeed> = Arc::new(OnChainFeed::new(
            client.clone(),
            tokens.clone(),
            Usd::from_dollars(config.min_liquidity_usd),
            config.max_quote_age_ms,
        ));

        let signer: Option<Arc<dyn TransactionSigner>> = match config.execution_mode {
            ExecutionMode::Simulation => None,
            ExecutionMode::DryRun | ExecutionMode::Production => {
                Some(Arc::new(WalletManager::from_env(chain.chain_id)?))
            }
        };

        info!(
            "✓ Chain {} ({}): {} tokens, {} venues, {} loan providers",
            chain.chain_id,
            chain.name,
            tokens.len(),
            venues.len(),
            providers.len()
        );

        Ok(Self::new(
            config,
            chain,
            ScannerParts { client, feed, tokens, venues, providers },
            ledger,
            slots,
            signer,
        ))
    }

    pub fn new(
        config: Arc<Config>,
        chain: &ChainConfig,
        parts: ScannerParts,
        ledger: Arc<FeedbackLedger>,
        slots: Arc<ExecutionSlots>,
        signer: Option<Arc<dyn TransactionSigner>>,
    ) -> Self {
        let ScannerParts { client, feed, tokens, venues, providers } = parts;
        let gas = Arc::new(GasOracle::new(client.clone(), Bps(config.priority_fee_multiplier_bps)));

        let submission = signer.map(|signer| {
            let relay = Arc::new(FlashbotsRelay::new(&chain.relay_url, signer.clone(), config.retry.clone()));
            SubmissionManager::new(
                chain.chain_id,
                client.clone(),
                relay,
                signer,
                gas.clone(),
                tokens.clone(),
                ledger.clone(),
                SubmissionConfig::from_config(&config, chain),
            )
        });

        let planner =
            ExecutionPlanner::new(&config, chain, tokens.clone(), venues.clone(), providers.clone(), ledger.clone());
        let engine = ExecutionEngine::new(
            chain.chain_id,
            config.execution_mode,
            config.emergency_stop,
            planner,
            slots,
            submission,
        );

        Self {
            chain_id: chain.chain_id,
            name: chain.name.clone(),
            path_finder: PathFinder::from_config(&config),
            evaluator: Evaluator::new(chain.chain_id, EvaluatorConfig::from_config(&config, chain)),
            config,
            client,
            feed,
            tokens,
            venues,
            providers,
            store: SnapshotStore::new(),
            gas,
            ledger,
            engine: Arc::new(engine),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.store.load()
    }

    /// Run the pipeline once. Errors are cross-cutting; everything else is
    /// logged and counted.
    pub async fn tick(&mut self) -> ArbResult<TickStats> {
        let start = Instant::now();
        let mut stats = TickStats::default();

        self.evaluator.calibrate(&self.ledger);

        let batch = collect_quotes(
            self.feed.clone(),
            &self.venues.all(),
            self.config.fetch_concurrency,
            Duration::from_millis(self.config.venue_timeout_ms),
        )
        .await?;
        stats.quotes = batch.quotes.len();
        stats.failed_venues = batch.failures.len();

        let repriced = self.tokens.refresh_from_quotes(&batch.quotes);
        if repriced > 0 {
            debug!("Chain {}: {} token prices refreshed", self.chain_id, repriced);
        }

        let snapshot = GraphSnapshot::build(&batch.quotes, batch.is_partial());
        stats.nodes = snapshot.node_count();
        stats.edges = snapshot.edge_count();
        stats.snapshot_version = self.store.publish(snapshot);
        let snapshot = self.store.load();

        let gas = self.gas.current().await?;

        let paths: Vec<Path> = self
            .path_finder
            .candidates(snapshot, &self.tokens.base_tokens())
            .take(MAX_CANDIDATES_PER_TICK)
            .collect();
        stats.candidates = paths.len();
        log_candidates(&paths, &self.tokens);

        let mut viable = Vec::new();
        {
            let ctx = ScoringContext {
                tokens: &self.tokens,
                loans: self.providers.as_ref(),
                gas_price_wei: gas.effective_gas_price(),
                now: chrono::Utc::now(),
            };
            for path in paths {
                match self.evaluator.evaluate(path, &ctx) {
                    Ok(opp) if opp.state() == OpportunityState::Viable => viable.push(opp),
                    Ok(opp) => {
                        stats.rejected += 1;
                        debug!("#{} {:?}: {}", opp.id, opp.state(), opp.reason_chain());
                    }
                    Err(err) => {
                        stats.rejected += 1;
                        warn!("Scoring failed: {}", err);
                    }
                }
            }
        }
        stats.viable = viable.len();

        let results = self.dispatch(viable).await;
        stats.executed = results.len();
        stats.succeeded = results.iter().filter(|r| r.is_success()).count();

        stats.elapsed = start.elapsed();
        self.log_tick(&stats);

        match results.iter().find_map(ExecutionResult::cross_cutting_error) {
            Some(err) => Err(err.clone()),
            None => Ok(stats),
        }
    }

    /// Hand Viable opportunities to the engine, best net first. Execution
    /// slots decide which of them actually proceed.
    async fn dispatch(&self, mut viable: Vec<Opportunity>) -> Vec<ExecutionResult> {
        viable.sort_by(|a, b| b.net_profit.cmp(&a.net_profit));

        let mut tasks = JoinSet::new();
        for opp in viable {
            let engine = self.engine.clone();
            tasks.spawn(async move { engine.execute(opp).await });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    match &result {
                        ExecutionResult::Skipped { reason } => debug!("Skipped: {}", reason),
                        ExecutionResult::Aborted { reason } => warn!("Aborted: {}", reason),
                        ExecutionResult::Failed(err) => warn!("Execution failed: {}", err),
                        _ => {}
                    }
                    results.push(result);
                }
                Err(err) => error!("Execution task panicked: {}", err),
            }
        }
        results
    }

    fn log_tick(&self, stats: &TickStats) {
        let line = format!(
            "⏱  Chain {} tick v{}: {} quotes ({} venues failed), {} nodes/{} edges, {} candidates, {} viable, {} rejected, {}/{} executed ok in {:?}",
            self.chain_id,
            stats.snapshot_version,
            stats.quotes,
            stats.failed_venues,
            stats.nodes,
            stats.edges,
            stats.candidates,
            stats.viable,
            stats.rejected,
            stats.succeeded,
            stats.executed,
            stats.elapsed
        );
        if stats.viable > 0 {
            info!("{}", style(line).green());
        } else {
            info!("{}", line);
        }
    }

    /// Tick on the scan interval until `shutdown` flips. Cross-cutting
    /// failures suspend this chain until it is healthy again.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("🚀 Scanner started for chain {} ({})", self.chain_id, self.name);
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.scan_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            if let Err(err) = self.tick().await {
                error!(
                    "{}",
                    style(format!("⛔ Chain {} suspended: {}", self.chain_id, err)).red().bold()
                );
                if !self.wait_until_healthy(&mut shutdown).await {
                    break;
                }
                interval.reset();
            }
        }

        info!("Scanner for chain {} stopped", self.chain_id);
    }

    /// Poll the health check until it passes. Returns false when shutdown
    /// arrived first.
    pub async fn wait_until_healthy(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let period = Duration::from_millis(self.config.health_check_interval_ms.max(1));
        let mut failures = 0u32;
        loop {
            if *shutdown.borrow() {
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => return false,
            }

            match self.client.health_check().await {
                Ok(head) => {
                    info!(
                        "{}",
                        style(format!(
                            "✓ Chain {} healthy again at block {} after {} failed check(s), resuming",
                            self.chain_id, head.number, failures
                        ))
                        .green()
                    );
                    return true;
                }
                Err(err) => {
                    failures += 1;
                    warn!("Chain {} still unhealthy ({}): {}", self.chain_id, failures, err);
                }
            }
        }
    }
}

impl std::fmt::Debug for ChainScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainScanner")
            .field("chain_id", &self.chain_id)
            .field("name", &self.name)
            .field("venues", &self.venues.len())
            .finish()
    }
}
