//! Phase 3: The Executor
//!
//! Takes Viable opportunities from the brain and carries them to a terminal
//! state:
//! - Execution slot per (chain, loan asset)
//! - Flash-loan plan with per-hop min-output guards
//! - Private relay submission with fee escalation
//!
//! ⚠️  WARNING: Production mode signs and sends real transactions!
//! Run Simulation and DryRun first.

mod flash_loan;
mod planner;
mod relay;
mod signer;
mod slots;
mod submission;

#[cfg(test)]
pub(crate) mod fixtures;

pub use flash_loan::LoanProviderBook;
pub use planner::ExecutionPlanner;
pub use relay::FlashbotsRelay;
pub use signer::{TransactionSigner, WalletManager};
pub use slots::ExecutionSlots;
pub use submission::{SubmissionConfig, SubmissionManager};

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::brain::Opportunity;
use crate::config::ExecutionMode;
use crate::errors::ArbError;
use crate::fixed::Usd;
use crate::ledger::SubmissionResult;

/// The main execution engine for one chain
pub struct ExecutionEngine {
    chain_id: u64,
    mode: ExecutionMode,
    emergency_stop: bool,
    planner: ExecutionPlanner,
    slots: Arc<ExecutionSlots>,
    /// Absent in Simulation mode, where nothing is signed
    submission: Option<SubmissionManager>,
}

impl ExecutionEngine {
    pub fn new(
        chain_id: u64,
        mode: ExecutionMode,
        emergency_stop: bool,
        planner: ExecutionPlanner,
        slots: Arc<ExecutionSlots>,
        submission: Option<SubmissionManager>,
    ) -> Self {
        Self {
            chain_id,
            mode,
            emergency_stop,
            planner,
            slots,
            submission,
        }
    }

    /// Carry one Viable opportunity to a terminal state. The slot for its
    /// loan asset is held from planning until the result is known.
    pub async fn execute(&self, mut opp: Opportunity) -> ExecutionResult {
        if self.emergency_stop {
            let reason = "emergency stop is active".to_string();
            expire_or_warn(&mut opp, reason.clone());
            return ExecutionResult::Aborted { reason };
        }

        let _slot = match self.slots.acquire(self.chain_id, opp.asset()).await {
            Ok(slot) => slot,
            Err(err) => {
                expire_or_warn(&mut opp, err.to_string());
                return ExecutionResult::Skipped { reason: err.to_string() };
            }
        };

        // Plans are built after the slot is ours so the staleness re-check
        // covers any time spent queued
        let plan = match self.planner.plan(&mut opp, Utc::now()) {
            Ok(plan) => plan,
            Err(err) if err.is_cross_cutting() => return ExecutionResult::Failed(err),
            Err(err) => return ExecutionResult::Skipped { reason: err.to_string() },
        };

        match self.mode {
            ExecutionMode::Simulation => {
                info!("📋 SIMULATION MODE: Would execute #{}", opp.id);
                info!("   Provider: {} ({}) borrowing {}", plan.provider_id, plan.provider_kind, plan.loan_amount);
                for swap in &plan.swaps {
                    info!(
                        "   {} {:?} → {:?}: in {} min out {}",
                        swap.venue, swap.token_in, swap.token_out, swap.amount_in, swap.min_out
                    );
                }
                info!(
                    "   Output {} vs repay {} | expected ${:.2}",
                    plan.final_expected_out(),
                    plan.repay_amount,
                    plan.expected_profit.as_dollars()
                );
                expire_or_warn(&mut opp, "simulation mode: plan built, not submitted");
                ExecutionResult::Simulated {
                    expected_profit: plan.expected_profit,
                    swaps: plan.swaps.len(),
                }
            }
            ExecutionMode::DryRun | ExecutionMode::Production => {
                let Some(submission) = &self.submission else {
                    let reason = format!("{} mode without a signer", self.mode);
                    warn!("{}", reason);
                    expire_or_warn(&mut opp, reason.clone());
                    return ExecutionResult::Aborted { reason };
                };
                match submission.execute(&mut opp, &plan).await {
                    Ok(Some(result)) => ExecutionResult::Settled(result),
                    Ok(None) => ExecutionResult::DryRun {
                        expected_profit: plan.expected_profit,
                    },
                    Err(err) => ExecutionResult::Failed(err),
                }
            }
        }
    }
}

fn expire_or_warn(opp: &mut Opportunity, reason: impl Into<String>) {
    if let Err(err) = opp.expire(reason) {
        warn!("#{} could not be expired from {}: {}", opp.id, opp.state(), err);
    }
}

/// Result of an execution attempt
#[derive(Debug)]
pub enum ExecutionResult {
    /// Plan built and logged (simulation mode)
    Simulated { expected_profit: Usd, swaps: usize },

    /// Relay simulation passed, nothing sent
    DryRun { expected_profit: Usd },

    /// Reached the relay; the ledger entry says how it ended
    Settled(Arc<SubmissionResult>),

    /// Dropped before submission
    Skipped { reason: String },

    /// Safety stop
    Aborted { reason: String },

    Failed(ArbError),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        match self {
            ExecutionResult::Simulated { .. } | ExecutionResult::DryRun { .. } => true,
            ExecutionResult::Settled(result) => result.is_success(),
            _ => false,
        }
    }

    /// Failures that should suspend the chain's scanner
    pub fn cross_cutting_error(&self) -> Option<&ArbError> {
        match self {
            ExecutionResult::Failed(err) if err.is_cross_cutting() => Some(err),
            _ => None,
        }
    }
}
