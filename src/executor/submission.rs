//! Protected Submission
//!
//! Sign → relay-simulate → submit to a private relay → watch for inclusion.
//!
//! - A simulated revert abandons the plan before anything is broadcast
//! - A bundle that misses its window is resubmitted for a later block at a
//!   higher priority fee, up to the attempt budget, then expires
//! - Every terminal outcome lands in the feedback ledger

use alloy_primitives::B256;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::planner::ExecutionPlan;
use super::relay::{Bundle, BundleRelay};
use super::signer::{SignedTx, TransactionSigner};
use crate::brain::{Opportunity, OpportunityState};
use crate::config::{ChainConfig, Config, ExecutionMode};
use crate::errors::{ArbError, ArbResult, FailureKind};
use crate::fixed::{Bps, Usd};
use crate::gas_oracle::{gas_cost_usd, GasOracle, GasPriceInfo};
use crate::ledger::{FeedbackLedger, InclusionOutcome, SubmissionResult};
use crate::rpc::{ChainClient, InclusionStatus};
use crate::tokens::TokenRegistry;

#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    pub mode: ExecutionMode,
    /// Total submissions, the first one included
    pub max_attempts: u32,
    /// Blocks each submission may take to land
    pub inclusion_blocks: u64,
    pub poll_interval: Duration,
    /// Priority fee multiplier per resubmission
    pub escalation: Bps,
    /// Wall-clock bound on one attempt's inclusion wait
    pub inclusion_timeout: Duration,
}

/// Added to the inclusion window for receipt propagation
const INCLUSION_SLACK: Duration = Duration::from_secs(2);

impl SubmissionConfig {
    pub fn from_config(config: &Config, chain: &ChainConfig) -> Self {
        let inclusion_blocks = config.inclusion_blocks.max(1);
        Self {
            mode: config.execution_mode,
            max_attempts: config.max_submission_attempts.max(1),
            inclusion_blocks,
            poll_interval: Duration::from_millis(config.inclusion_poll_ms),
            escalation: Bps(config.priority_fee_escalation_bps),
            inclusion_timeout: inclusion_timeout(chain.block_time_ms, inclusion_blocks),
        }
    }
}

/// One block time per block in the window plus one, then slack
pub fn inclusion_timeout(block_time_ms: u64, inclusion_blocks: u64) -> Duration {
    Duration::from_millis(block_time_ms.saturating_mul(inclusion_blocks.saturating_add(1))) + INCLUSION_SLACK
}

/// What one submission attempt came to
enum AttemptOutcome {
    Landed { block: u64, gas_used: u64, reverted: bool },
    Missed { target_block: u64 },
}

pub struct SubmissionManager {
    chain_id: u64,
    client: Arc<dyn ChainClient>,
    relay: Arc<dyn BundleRelay>,
    signer: Arc<dyn TransactionSigner>,
    gas: Arc<GasOracle>,
    tokens: Arc<TokenRegistry>,
    ledger: Arc<FeedbackLedger>,
    config: SubmissionConfig,
}

impl SubmissionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_id: u64,
        client: Arc<dyn ChainClient>,
        relay: Arc<dyn BundleRelay>,
        signer: Arc<dyn TransactionSigner>,
        gas: Arc<GasOracle>,
        tokens: Arc<TokenRegistry>,
        ledger: Arc<FeedbackLedger>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            chain_id,
            client,
            relay,
            signer,
            gas,
            tokens,
            ledger,
            config,
        }
    }

    /// Drive a Planned opportunity to a terminal state.
    ///
    /// Returns the ledger entry for every outcome that reached the relay,
    /// `None` for a dry run. Errors are chain or relay failures; the
    /// opportunity is expired and the failure recorded before they return.
    pub async fn execute(&self, opp: &mut Opportunity, plan: &ExecutionPlan) -> ArbResult<Option<Arc<SubmissionResult>>> {
        if opp.state() != OpportunityState::Planned {
            return Err(ArbError::InvalidTransition {
                from: opp.state().to_string(),
                to: OpportunityState::Submitted.to_string(),
            });
        }

        match self.drive(opp, plan).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if !opp.state().is_terminal() {
                    opp.expire(format!("submission failed: {}", err))?;
                    self.record(opp, plan, InclusionOutcome::Expired, Some(err.kind()), Usd::ZERO, 0, Usd::ZERO, None, 0);
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, opp: &mut Opportunity, plan: &ExecutionPlan) -> ArbResult<Option<Arc<SubmissionResult>>> {
        let nonce = self.client.nonce(self.signer.address()).await?;
        let mut gas = self.gas.current().await?;
        let mut signed = self.sign(plan, nonce, &gas, 1).await?;

        let head = self.client.head().await?;
        let simulation = self.relay.simulate(&Bundle::single(signed.raw.clone(), head.number + 1)).await?;
        if !simulation.success {
            let err = ArbError::SimulationRevert(simulation.error.unwrap_or_else(|| "unknown revert".into()));
            opp.reject(err.to_string())?;
            let entry = self.record(opp, plan, InclusionOutcome::Abandoned, Some(err.kind()), Usd::ZERO, 0, Usd::ZERO, None, 0);
            return Ok(Some(entry));
        }
        info!(
            "🧪 Relay simulation passed for #{}: gas {:?}, coinbase diff {:?}",
            opp.id, simulation.gas_used, simulation.coinbase_diff
        );

        if self.config.mode == ExecutionMode::DryRun {
            opp.expire("dry run: relay simulation passed, bundle not sent")?;
            return Ok(None);
        }

        let mut last_target = head.number + 1;
        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                gas = self.gas.current().await?;
                // Same nonce: a later attempt replaces the earlier one
                signed = self.sign(plan, nonce, &gas, attempt).await?;
            }

            match self.attempt(opp, &signed, &gas, attempt).await? {
                AttemptOutcome::Landed { block, gas_used, reverted } => {
                    let price = gas.base_fee_wei + gas.priority_for_attempt(attempt, self.config.escalation);
                    let gas_cost = gas_cost_usd(gas_used, price, self.tokens.native_usd());

                    let entry = if reverted {
                        let err = ArbError::SlippageExceeded(format!("min-output guard tripped in block {}", block));
                        opp.transition(OpportunityState::Reverted, err.to_string())?;
                        self.record(opp, plan, InclusionOutcome::Reverted, Some(err.kind()), -gas_cost, gas_used, gas_cost, Some(block), attempt)
                    } else {
                        let realized = opp.net_profit + opp.gas_estimate - gas_cost;
                        opp.transition(
                            OpportunityState::Included,
                            format!("block {}, realized {} (expected {})", block, realized, opp.net_profit),
                        )?;
                        self.record(opp, plan, InclusionOutcome::Included, None, realized, gas_used, gas_cost, Some(block), attempt)
                    };
                    return Ok(Some(entry));
                }
                AttemptOutcome::Missed { target_block } => {
                    last_target = target_block;
                    warn!(
                        "⏳ #{} not included by block {} (attempt {}/{})",
                        opp.id, target_block, attempt, self.config.max_attempts
                    );
                }
            }
        }

        let err = ArbError::NotIncluded { target_block: last_target };
        opp.expire(format!("{} after {} attempts", err, self.config.max_attempts))?;
        let entry = self.record(
            opp,
            plan,
            InclusionOutcome::Expired,
            Some(FailureKind::NotIncluded),
            Usd::ZERO,
            0,
            Usd::ZERO,
            None,
            self.config.max_attempts,
        );
        Ok(Some(entry))
    }

    async fn sign(&self, plan: &ExecutionPlan, nonce: u64, gas: &GasPriceInfo, attempt: u32) -> ArbResult<SignedTx> {
        let priority = gas.priority_for_attempt(attempt, self.config.escalation);
        self.signer.sign_plan(plan, nonce, gas.max_fee_per_gas(priority), priority).await
    }

    /// Send one bundle for the next block and watch it for the inclusion window
    async fn attempt(&self, opp: &mut Opportunity, signed: &SignedTx, gas: &GasPriceInfo, attempt: u32) -> ArbResult<AttemptOutcome> {
        let head = self.client.head().await?;
        let target_block = head.number + 1;
        let priority = gas.priority_for_attempt(attempt, self.config.escalation);

        match self.relay.send_bundle(&Bundle::single(signed.raw.clone(), target_block)).await {
            Ok(bundle_hash) => {
                opp.transition(
                    OpportunityState::Submitted,
                    format!(
                        "attempt {} for block {} at {:.2} gwei tip ({})",
                        attempt,
                        target_block,
                        GasPriceInfo::gwei(priority),
                        bundle_hash
                    ),
                )?;
                info!("🚀 #{} bundle {} → block {}", opp.id, bundle_hash, target_block);
            }
            Err(ArbError::RelayRejected(reason)) => {
                // Rejected bundles never land; the next attempt retries at a higher fee
                warn!("Relay rejected #{} for block {}: {}", opp.id, target_block, reason);
                return Ok(AttemptOutcome::Missed { target_block });
            }
            Err(err) => return Err(err),
        }

        let started = Instant::now();
        match tokio::time::timeout(self.config.inclusion_timeout, self.await_inclusion(signed.hash, target_block)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let elapsed = started.elapsed();
                warn!("⏱️ #{} inclusion wait for block {} timed out after {:?}", opp.id, target_block, elapsed);
                Err(ArbError::Timeout {
                    operation: format!("inclusion wait for block {}", target_block),
                    elapsed,
                })
            }
        }
    }

    /// Poll the receipt until it lands or the head passes the window
    async fn await_inclusion(&self, tx_hash: B256, target_block: u64) -> ArbResult<AttemptOutcome> {
        let last_block = target_block + self.config.inclusion_blocks - 1;
        loop {
            match self.client.transaction_status(tx_hash).await? {
                InclusionStatus::Included { block, gas_used } => {
                    return Ok(AttemptOutcome::Landed { block, gas_used, reverted: false })
                }
                InclusionStatus::Reverted { block, gas_used } => {
                    return Ok(AttemptOutcome::Landed { block, gas_used, reverted: true })
                }
                InclusionStatus::Pending => {}
            }

            if self.client.head().await?.number > last_block {
                return Ok(AttemptOutcome::Missed { target_block });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        opp: &Opportunity,
        plan: &ExecutionPlan,
        outcome: InclusionOutcome,
        failure: Option<FailureKind>,
        realized_profit: Usd,
        gas_used: u64,
        gas_cost: Usd,
        block: Option<u64>,
        attempts: u32,
    ) -> Arc<SubmissionResult> {
        let entry = SubmissionResult {
            opportunity_id: opp.id,
            chain_id: self.chain_id,
            asset: plan.asset,
            provider: plan.provider_id.clone(),
            venues: opp.path.venues(),
            outcome,
            failure,
            expected_profit: opp.net_profit,
            realized_profit,
            gas_used,
            gas_cost,
            block,
            attempts,
            recorded_at: Utc::now(),
        };
        match outcome {
            InclusionOutcome::Included => info!("💰 #{} realized {}", opp.id, realized_profit),
            InclusionOutcome::Reverted => error!("#{} reverted on-chain, lost {} in gas", opp.id, gas_cost),
            _ => {}
        }
        self.ledger.append(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{Hop, Path};
    use crate::cartographer::Quote;
    use crate::config::LoanProviderKind;
    use crate::executor::fixtures::{submission_manager, FakeChain, FakeRelay, RelayReply};
    use crate::fixed::Ratio;
    use alloy_primitives::{Address, Bytes};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        manager: SubmissionManager,
        sends: Arc<AtomicU32>,
        ledger: Arc<FeedbackLedger>,
    }

    fn harness(mode: ExecutionMode, max_attempts: u32, land_on: Option<u32>, simulate_ok: bool, revert: bool) -> Harness {
        let sends = Arc::new(AtomicU32::new(0));
        let reply = if simulate_ok { RelayReply::Pass } else { RelayReply::Revert };
        assemble(FakeChain::new(sends.clone(), land_on, revert), reply, sends, mode, max_attempts)
    }

    fn assemble(chain: FakeChain, reply: RelayReply, sends: Arc<AtomicU32>, mode: ExecutionMode, max_attempts: u32) -> Harness {
        let ledger = Arc::new(FeedbackLedger::new());
        let manager = submission_manager(
            Arc::new(chain),
            Arc::new(FakeRelay { reply, sends: sends.clone() }),
            ledger.clone(),
            mode,
            max_attempts,
            Duration::from_millis(50),
        );
        Harness { manager, sends, ledger }
    }

    fn planned() -> (Opportunity, ExecutionPlan) {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let leg = |venue: &str, x, y| {
            Hop::new(Arc::new(Quote::new_for_test(venue, x, y, Ratio::ONE, Bps(30), Usd::from_whole(1_000_000))))
        };
        let path = Path::new(vec![leg("uni", a, b), leg("sushi", b, a)]).unwrap();

        let mut opp = Opportunity::detected(1, path);
        opp.net_profit = Usd::from_whole(7);
        opp.gas_estimate = Usd::from_whole(3);
        opp.transition(OpportunityState::Scored, "net $7").unwrap();
        opp.transition(OpportunityState::Viable, "above threshold").unwrap();
        opp.transition(OpportunityState::Planned, "balancer").unwrap();

        let plan = ExecutionPlan {
            opportunity_id: opp.id,
            chain_id: 1,
            asset: a,
            provider_id: "balancer".into(),
            provider_kind: LoanProviderKind::BalancerV2,
            loan_amount: 1_000,
            input_amount: 1_000,
            loan_fee_amount: 0,
            repay_amount: 1_000,
            swaps: vec![],
            profit_recipient: Address::repeat_byte(0x0f),
            expected_surplus: 7,
            expected_profit: opp.net_profit,
            gas_units: 200_000,
            gas_limit: 300_000,
            to: Address::repeat_byte(0xba),
            calldata: Bytes::from(vec![0x5c, 0x38, 0x44, 0x9e]),
            built_at: Utc::now(),
        };
        (opp, plan)
    }

    #[tokio::test]
    async fn test_included_on_third_attempt() {
        let h = harness(ExecutionMode::Production, 3, Some(3), true, false);
        let (mut opp, plan) = planned();

        let entry = h.manager.execute(&mut opp, &plan).await.unwrap().unwrap();

        assert_eq!(opp.state(), OpportunityState::Included);
        assert_eq!(h.sends.load(Ordering::SeqCst), 3);
        assert_eq!(entry.outcome, InclusionOutcome::Included);
        assert_eq!(entry.attempts, 3);
        assert!(entry.realized_profit.is_positive());
        assert_eq!(h.ledger.len(), 1);
        // Three Submitted moves, one per attempt
        assert_eq!(opp.reasons().iter().filter(|r| r.contains("->Submitted")).count(), 3);
    }

    #[tokio::test]
    async fn test_expires_when_attempts_run_out() {
        let h = harness(ExecutionMode::Production, 2, Some(3), true, false);
        let (mut opp, plan) = planned();

        let entry = h.manager.execute(&mut opp, &plan).await.unwrap().unwrap();

        assert_eq!(opp.state(), OpportunityState::Expired);
        assert_eq!(h.sends.load(Ordering::SeqCst), 2);
        assert_eq!(entry.outcome, InclusionOutcome::Expired);
        assert_eq!(entry.failure, Some(FailureKind::NotIncluded));
        assert_eq!(entry.realized_profit, Usd::ZERO);
    }

    #[tokio::test]
    async fn test_simulated_revert_sends_nothing() {
        let h = harness(ExecutionMode::Production, 3, Some(1), false, false);
        let (mut opp, plan) = planned();

        let entry = h.manager.execute(&mut opp, &plan).await.unwrap().unwrap();

        assert_eq!(opp.state(), OpportunityState::Rejected);
        assert_eq!(h.sends.load(Ordering::SeqCst), 0);
        assert_eq!(entry.outcome, InclusionOutcome::Abandoned);
        assert_eq!(entry.failure, Some(FailureKind::SimulationRevert));
        assert_eq!(entry.gas_cost, Usd::ZERO);
    }

    #[tokio::test]
    async fn test_on_chain_revert_costs_gas() {
        let h = harness(ExecutionMode::Production, 3, Some(1), true, true);
        let (mut opp, plan) = planned();

        let entry = h.manager.execute(&mut opp, &plan).await.unwrap().unwrap();

        assert_eq!(opp.state(), OpportunityState::Reverted);
        assert_eq!(entry.failure, Some(FailureKind::SlippageExceeded));
        assert!(entry.gas_cost.is_positive());
        assert_eq!(entry.realized_profit, -entry.gas_cost);
        assert_eq!(h.ledger.venue_stats(1, "uni").failures, 1);
    }

    #[tokio::test]
    async fn test_dry_run_stops_after_simulation() {
        let h = harness(ExecutionMode::DryRun, 3, Some(1), true, false);
        let (mut opp, plan) = planned();

        assert!(h.manager.execute(&mut opp, &plan).await.unwrap().is_none());
        assert_eq!(opp.state(), OpportunityState::Expired);
        assert_eq!(h.sends.load(Ordering::SeqCst), 0);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_head_times_out_and_expires() {
        let sends = Arc::new(AtomicU32::new(0));
        let h = assemble(FakeChain::frozen(sends.clone()), RelayReply::Pass, sends, ExecutionMode::Production, 1);
        let (mut opp, plan) = planned();

        let outcome = tokio::time::timeout(Duration::from_secs(5), h.manager.execute(&mut opp, &plan))
            .await
            .expect("inclusion wait must be bounded");
        let err = outcome.unwrap_err();

        assert!(matches!(err, ArbError::Timeout { ref operation, .. } if operation.contains("inclusion wait")));
        assert_eq!(opp.state(), OpportunityState::Expired);
        assert_eq!(h.sends.load(Ordering::SeqCst), 1);

        let recorded = h.ledger.recent(1);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].outcome, InclusionOutcome::Expired);
        assert_eq!(recorded[0].failure, Some(FailureKind::Timeout));
        // Expiries say nothing about venue quality
        assert_eq!(h.ledger.venue_stats(1, "uni").attempts, 0);
    }

    #[tokio::test]
    async fn test_relay_error_does_not_charge_venues() {
        let sends = Arc::new(AtomicU32::new(0));
        let h = assemble(FakeChain::new(sends.clone(), Some(1), false), RelayReply::Reject, sends, ExecutionMode::Production, 3);
        let (mut opp, plan) = planned();

        let err = h.manager.execute(&mut opp, &plan).await.unwrap_err();

        assert!(matches!(err, ArbError::RelayRejected(_)));
        assert_eq!(opp.state(), OpportunityState::Expired);
        assert_eq!(h.sends.load(Ordering::SeqCst), 0);
        let recorded = h.ledger.recent(1);
        assert_eq!(recorded[0].outcome, InclusionOutcome::Expired);
        assert_eq!(recorded[0].failure, Some(FailureKind::RelayRejected));
        assert_eq!(h.ledger.venue_stats(1, "uni"), Default::default());
        assert_eq!(h.ledger.venue_stats(1, "sushi"), Default::default());
    }

    #[test]
    fn test_inclusion_timeout_covers_window() {
        assert_eq!(inclusion_timeout(12_000, 2), Duration::from_secs(38));
        assert_eq!(inclusion_timeout(2_000, 1), Duration::from_secs(6));
    }
}
