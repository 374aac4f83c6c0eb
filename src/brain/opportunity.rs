//! Opportunity lifecycle
//!
//! ```text
//! Detected → Scored → Viable → Planned → Submitted → Included
//!                  ↘ Rejected        ↘ Expired          ↘ Reverted | Expired
//! ```
//!
//! Every move appends to a reason chain; reaching a terminal state logs the
//! whole chain in one line.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::path_finder::Path;
use crate::errors::{ArbError, ArbResult};
use crate::fixed::{Bps, Usd};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpportunityState {
    Detected,
    Scored,
    Viable,
    Rejected,
    Planned,
    Submitted,
    Included,
    Reverted,
    Expired,
}

impl OpportunityState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OpportunityState::Rejected
                | OpportunityState::Included
                | OpportunityState::Reverted
                | OpportunityState::Expired
        )
    }

    pub fn can_transition_to(self, next: OpportunityState) -> bool {
        use OpportunityState::*;
        matches!(
            (self, next),
            (Detected, Scored)
                | (Detected, Rejected)
                | (Scored, Viable)
                | (Scored, Rejected)
                | (Viable, Planned)
                | (Viable, Rejected)
                | (Viable, Expired)
                | (Planned, Submitted)
                | (Planned, Rejected)
                | (Planned, Expired)
                // resubmission at a higher fee
                | (Submitted, Submitted)
                | (Submitted, Included)
                | (Submitted, Reverted)
                | (Submitted, Expired)
        )
    }
}

impl fmt::Display for OpportunityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A scored path and everything decided about it so far
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub id: u64,
    pub chain_id: u64,
    pub path: Path,

    /// Raw amount of the start token put through the cycle
    pub input_amount: u128,
    pub input_usd: Usd,

    pub expected_gross_profit: Usd,
    pub gas_units: u64,
    pub gas_estimate: Usd,
    pub slippage_estimate: Usd,
    pub flash_loan_fee: Usd,
    pub net_profit: Usd,
    pub risk_score: Bps,

    state: OpportunityState,
    reasons: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn detected(chain_id: u64, path: Path) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            chain_id,
            path,
            input_amount: 0,
            input_usd: Usd::ZERO,
            expected_gross_profit: Usd::ZERO,
            gas_units: 0,
            gas_estimate: Usd::ZERO,
            slippage_estimate: Usd::ZERO,
            flash_loan_fee: Usd::ZERO,
            net_profit: Usd::ZERO,
            risk_score: Bps::ZERO,
            state: OpportunityState::Detected,
            reasons: Vec::new(),
            detected_at: Utc::now(),
        }
    }

    pub fn state(&self) -> OpportunityState {
        self.state
    }

    /// Loan asset, the token the cycle starts and ends in
    pub fn asset(&self) -> Address {
        self.path.start_token()
    }

    /// Move to `next`, recording why. Terminal states are logged with the
    /// full reason chain.
    pub fn transition(&mut self, next: OpportunityState, reason: impl Into<String>) -> ArbResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ArbError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }

        let reason = reason.into();
        debug!("Opportunity #{}: {} -> {} ({})", self.id, self.state, next, reason);
        self.reasons.push(format!("{}->{}: {}", self.state, next, reason));
        self.state = next;

        if next.is_terminal() {
            self.log_terminal();
        }
        Ok(())
    }

    /// Shortcut for terminal moves that can't be illegal from the caller's state
    pub fn reject(&mut self, reason: impl Into<String>) -> ArbResult<()> {
        self.transition(OpportunityState::Rejected, reason)
    }

    pub fn expire(&mut self, reason: impl Into<String>) -> ArbResult<()> {
        self.transition(OpportunityState::Expired, reason)
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn reason_chain(&self) -> String {
        self.reasons.join(" | ")
    }

    fn log_terminal(&self) {
        let label = match self.state {
            OpportunityState::Included => style("INCLUDED").green().bold(),
            OpportunityState::Reverted => style("REVERTED").red().bold(),
            OpportunityState::Expired => style("EXPIRED").yellow(),
            _ => style("REJECTED").dim(),
        };
        info!(
            "{} #{} chain {} via {} | net {} risk {} | {}",
            label,
            self.id,
            self.chain_id,
            self.path.venues().join("→"),
            self.net_profit,
            self.risk_score,
            self.reason_chain()
        );
    }
}
