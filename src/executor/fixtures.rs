//! Shared fixtures for executor tests: a 2% triangle A → B → C → A over three
//! venues, priced in dollar-pegged tokens, plus a scripted chain and relay.

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::flash_loan::{LoanProvider, LoanProviderBook};
use super::relay::{Bundle, BundleRelay, RelaySimulation};
use super::signer::WalletManager;
use super::submission::{SubmissionConfig, SubmissionManager};
use crate::brain::{Evaluator, EvaluatorConfig, Hop, Opportunity, OpportunityState, Path, ScoringContext};
use crate::cartographer::{Pool, Quote, Venue, VenueRegistry};
use crate::config::{ExecutionMode, GasModel, LoanProviderKind, RiskWeights};
use crate::errors::{ArbError, ArbResult};
use crate::fixed::{Bps, Ratio, Usd};
use crate::gas_oracle::GasOracle;
use crate::ledger::FeedbackLedger;
use crate::rpc::{BlockHead, ChainClient, InclusionStatus};
use crate::tokens::{Token, TokenRegistry};

pub const GWEI: u128 = 1_000_000_000;
pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn token(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn registry() -> Arc<TokenRegistry> {
    let t = |n: u8, symbol: &str, decimals: u8, price: i64| {
        (
            Token { symbol: symbol.into(), address: token(n), decimals, is_base: true },
            Usd::from_whole(price),
        )
    };
    Arc::new(TokenRegistry::new(
        vec![t(1, "A", 6, 1), t(2, "B", 18, 1), t(3, "C", 6, 1), t(9, "NATIVE", 18, 1_000)],
        token(9),
        None,
    ))
}

pub fn triangle() -> Path {
    let hop = |venue: &str, a, b, rate| {
        Hop::new(Arc::new(Quote::new_for_test(venue, token(a), token(b), rate, Bps(30), Usd::from_whole(100_000_000))))
    };
    Path::new(vec![
        hop("uni", 1, 2, Ratio::ONE),
        hop("sushi", 2, 3, Ratio::ONE),
        hop("curve", 3, 1, Ratio::from_fraction(102, 100).unwrap()),
    ])
    .unwrap()
}

/// One venue per hop, holding exactly the pool the quote came from
pub fn venues_for(path: &Path) -> Arc<VenueRegistry> {
    let mut registry = VenueRegistry::new();
    for (i, hop) in path.hops.iter().enumerate() {
        registry
            .register(Venue {
                id: hop.venue().to_string(),
                chain_id: 1,
                family: hop.quote.family,
                router: Address::repeat_byte(0x40 + i as u8),
                factory: None,
                fee: hop.quote.fee,
                pools: vec![Pool {
                    address: hop.pool(),
                    tokens: vec![hop.token_in(), hop.token_out()],
                    fee: hop.quote.fee,
                }],
            })
            .unwrap();
    }
    Arc::new(registry)
}

/// Aave at 5 bps, lending up to `capacity` raw units of token A
pub fn aave(capacity: u128) -> Arc<LoanProviderBook> {
    Arc::new(LoanProviderBook::new(vec![LoanProvider::new(
        "aave",
        LoanProviderKind::AaveV3,
        Address::repeat_byte(0xaa),
        Bps(5),
        vec![(token(1), capacity)],
    )]))
}

/// The triangle scored Viable at $500
pub fn viable(tokens: &TokenRegistry, safety_margin: Bps) -> Opportunity {
    let evaluator = Evaluator::new(
        1,
        EvaluatorConfig {
            min_profit: Usd::from_whole(5),
            max_risk: Bps(6_000),
            max_trade: Usd::from_whole(500),
            safety_margin,
            max_quote_age_ms: 6_000,
            weights: RiskWeights::default(),
            gas: GasModel { base_gas: 40_000, gas_per_hop: 70_000 },
        },
    );
    let loans = aave(u128::MAX);
    let ctx = ScoringContext { tokens, loans: loans.as_ref(), gas_price_wei: 11 * GWEI, now: Utc::now() };
    let opp = evaluator.evaluate(triangle(), &ctx).unwrap();
    assert_eq!(opp.state(), OpportunityState::Viable);
    opp
}

/// How the relay answers `eth_callBundle`
#[derive(Debug, Clone, Copy)]
pub enum RelayReply {
    Pass,
    /// Per-transaction revert
    Revert,
    /// Top-level JSON-RPC error
    Reject,
}

/// Relay that counts sends; inclusion is decided by the chain
pub struct FakeRelay {
    pub reply: RelayReply,
    pub sends: Arc<AtomicU32>,
}

#[async_trait]
impl BundleRelay for FakeRelay {
    async fn simulate(&self, _bundle: &Bundle) -> ArbResult<RelaySimulation> {
        match self.reply {
            RelayReply::Pass => Ok(RelaySimulation { success: true, gas_used: Some(200_000), ..Default::default() }),
            RelayReply::Revert => Ok(RelaySimulation {
                success: false,
                error: Some("execution reverted: TOO_LITTLE_RECEIVED".to_string()),
                ..Default::default()
            }),
            RelayReply::Reject => Err(ArbError::RelayRejected("rate limit exceeded".into())),
        }
    }

    async fn send_bundle(&self, bundle: &Bundle) -> ArbResult<String> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(format!("0xbundle{}", bundle.block_number))
    }
}

/// Chain whose head advances one block per read, unless frozen. The
/// transaction lands once `land_on` bundles have been sent.
pub struct FakeChain {
    pub block: AtomicU64,
    pub sends: Arc<AtomicU32>,
    pub land_on: Option<u32>,
    pub revert: bool,
    pub frozen: bool,
}

impl FakeChain {
    pub fn new(sends: Arc<AtomicU32>, land_on: Option<u32>, revert: bool) -> Self {
        Self { block: AtomicU64::new(100), sends, land_on, revert, frozen: false }
    }

    /// Head stuck at block 100 and nothing ever lands
    pub fn frozen(sends: Arc<AtomicU32>) -> Self {
        Self { frozen: true, ..Self::new(sends, None, false) }
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        1
    }

    async fn head(&self) -> ArbResult<BlockHead> {
        let number = if self.frozen {
            self.block.load(Ordering::SeqCst)
        } else {
            self.block.fetch_add(1, Ordering::SeqCst)
        };
        Ok(BlockHead { number, timestamp: 0, base_fee_wei: 10 * GWEI })
    }

    async fn call(&self, _to: Address, _data: Bytes) -> ArbResult<Bytes> {
        Ok(Bytes::new())
    }

    async fn transaction_status(&self, _tx_hash: B256) -> ArbResult<InclusionStatus> {
        let block = self.block.load(Ordering::SeqCst);
        let landed = matches!(self.land_on, Some(n) if self.sends.load(Ordering::SeqCst) >= n);
        Ok(match (landed, self.revert) {
            (true, true) => InclusionStatus::Reverted { block, gas_used: 150_000 },
            (true, false) => InclusionStatus::Included { block, gas_used: 200_000 },
            (false, _) => InclusionStatus::Pending,
        })
    }

    async fn nonce(&self, _address: Address) -> ArbResult<u64> {
        Ok(3)
    }
}

/// Submission manager on chain 1 with a two-block inclusion window
pub fn submission_manager(
    chain: Arc<dyn ChainClient>,
    relay: Arc<dyn BundleRelay>,
    ledger: Arc<FeedbackLedger>,
    mode: ExecutionMode,
    max_attempts: u32,
    inclusion_timeout: Duration,
) -> SubmissionManager {
    let signer = Arc::new(WalletManager::new(TEST_KEY, None, 1).unwrap());
    SubmissionManager::new(
        1,
        chain.clone(),
        relay,
        signer,
        Arc::new(GasOracle::new(chain, Bps(1_000))),
        registry(),
        ledger,
        SubmissionConfig {
            mode,
            max_attempts,
            inclusion_blocks: 2,
            poll_interval: Duration::from_millis(1),
            escalation: Bps(12_500),
            inclusion_timeout,
        },
    )
}
