//! Failure taxonomy shared by every pipeline phase.
//!
//! Each variant knows whether it is worth retrying and whether it is
//! cross-cutting (suspends the whole chain scanner) or local (absorbed by the
//! component that hit it).

use std::time::Duration;
use thiserror::Error;

pub type ArbResult<T> = std::result::Result<T, ArbError>;

#[derive(Debug, Clone, Error)]
pub enum ArbError {
    /// RPC or relay network failure
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// A network call exceeded its time budget
    #[error("timed out after {elapsed:?} during {operation}")]
    Timeout { operation: String, elapsed: Duration },

    /// Quote or opportunity older than the configured bound
    #[error("stale data: {what} is {age_ms}ms old (limit {limit_ms}ms)")]
    StaleData { what: String, age_ms: u64, limit_ms: u64 },

    /// Pool too shallow to quote or to trade through
    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    /// Pre-submission dry run reverted; nothing was broadcast
    #[error("simulation reverted: {0}")]
    SimulationRevert(String),

    /// Transaction landed and reverted on a min-output guard
    #[error("slippage exceeded on-chain: {0}")]
    SlippageExceeded(String),

    /// Bundle missed its target block
    #[error("bundle not included by block {target_block}")]
    NotIncluded { target_block: u64 },

    /// Every RPC endpoint for a chain failed
    #[error("all {count} RPC endpoints down for chain {chain_id}: {last}")]
    AllEndpointsDown { chain_id: u64, count: usize, last: String },

    /// No flash-loan provider can fund the trade
    #[error("no flash-loan provider can supply {amount} of {asset}")]
    ProviderUnavailable { asset: String, amount: String },

    /// Another plan already owns the (chain, asset) slot
    #[error("execution slot busy for chain {chain_id} asset {asset}")]
    SlotBusy { chain_id: u64, asset: String },

    /// Illegal opportunity lifecycle move
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Relay rejected the bundle outright
    #[error("relay rejected bundle: {0}")]
    RelayRejected(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse failure kind used for ledger statistics and log grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    Unreachable,
    Timeout,
    StaleData,
    InsufficientLiquidity,
    SimulationRevert,
    SlippageExceeded,
    NotIncluded,
    ProviderUnavailable,
    SlotBusy,
    RelayRejected,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Unreachable => "unreachable",
            FailureKind::Timeout => "timeout",
            FailureKind::StaleData => "stale_data",
            FailureKind::InsufficientLiquidity => "insufficient_liquidity",
            FailureKind::SimulationRevert => "simulation_revert",
            FailureKind::SlippageExceeded => "slippage_exceeded",
            FailureKind::NotIncluded => "not_included",
            FailureKind::ProviderUnavailable => "provider_unavailable",
            FailureKind::SlotBusy => "slot_busy",
            FailureKind::RelayRejected => "relay_rejected",
            FailureKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

impl ArbError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ArbError::Unreachable(_) | ArbError::AllEndpointsDown { .. } => FailureKind::Unreachable,
            ArbError::Timeout { .. } => FailureKind::Timeout,
            ArbError::StaleData { .. } => FailureKind::StaleData,
            ArbError::InsufficientLiquidity(_) => FailureKind::InsufficientLiquidity,
            ArbError::SimulationRevert(_) => FailureKind::SimulationRevert,
            ArbError::SlippageExceeded(_) => FailureKind::SlippageExceeded,
            ArbError::NotIncluded { .. } => FailureKind::NotIncluded,
            ArbError::ProviderUnavailable { .. } => FailureKind::ProviderUnavailable,
            ArbError::SlotBusy { .. } => FailureKind::SlotBusy,
            ArbError::RelayRejected(_) => FailureKind::RelayRejected,
            ArbError::InvalidTransition { .. }
            | ArbError::Encoding(_)
            | ArbError::Config(_) => FailureKind::Internal,
        }
    }

    /// Transient network failures; stale data is discarded, never retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArbError::Unreachable(_) | ArbError::Timeout { .. })
    }

    /// Failures that suspend a chain scanner until its health check passes
    pub fn is_cross_cutting(&self) -> bool {
        matches!(
            self,
            ArbError::AllEndpointsDown { .. } | ArbError::ProviderUnavailable { .. }
        )
    }

    pub fn unreachable(err: impl std::fmt::Display) -> Self {
        ArbError::Unreachable(err.to_string())
    }
}

impl From<reqwest::Error> for ArbError {
    fn from(err: reqwest::Error) -> Self {
        ArbError::Unreachable(err.to_string())
    }
}

impl From<serde_json::Error> for ArbError {
    fn from(err: serde_json::Error) -> Self {
        ArbError::Encoding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ArbError::Unreachable("x".into()).is_retryable());
        assert!(ArbError::Timeout { operation: "q".into(), elapsed: Duration::from_secs(1) }.is_retryable());
        assert!(!ArbError::StaleData { what: "q".into(), age_ms: 10, limit_ms: 5 }.is_retryable());

        let down = ArbError::AllEndpointsDown { chain_id: 1, count: 2, last: "refused".into() };
        assert!(down.is_cross_cutting());
        assert_eq!(down.kind(), FailureKind::Unreachable);
        assert!(!ArbError::NotIncluded { target_block: 5 }.is_cross_cutting());
    }
}
