//! Gas Price Oracle
//!
//! Reads the base fee from the chain head and derives the priority fee as a
//! configured multiple of it. Resubmissions escalate the priority fee.
//! Readings are cached for a short window to keep RPC load down.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::errors::ArbResult;
use crate::fixed::{mul_div, Bps, Usd, BPS_DENOMINATOR, WAD};
use crate::rpc::ChainClient;

// ============================================
// CONSTANTS
// ============================================

/// Cache duration for gas readings
const CACHE_DURATION_MS: u64 = 2_000;

/// Minimum priority fee (0.01 gwei)
const MIN_PRIORITY_WEI: u128 = 10_000_000;

/// Hard ceiling on any fee we pay (1000 gwei)
const MAX_FEE_WEI: u128 = 1_000_000_000_000;

// ============================================
// GAS PRICE INFO
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasSource {
    ChainHead,
    /// Stale cached reading served while the chain was unreachable
    StaleCache,
}

impl std::fmt::Display for GasSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GasSource::ChainHead => write!(f, "head"),
            GasSource::StaleCache => write!(f, "stale-cache"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GasPriceInfo {
    pub base_fee_wei: u128,

    /// Priority fee for a first submission
    pub priority_fee_wei: u128,

    /// Block the reading came from
    pub block: u64,

    pub fetched_at: Instant,
    pub source: GasSource,
}

impl GasPriceInfo {
    pub fn new(base_fee_wei: u128, multiplier: Bps, block: u64) -> Self {
        let priority = mul_div(base_fee_wei, multiplier.0 as u128, BPS_DENOMINATOR as u128)
            .unwrap_or(MAX_FEE_WEI)
            .clamp(MIN_PRIORITY_WEI, MAX_FEE_WEI);
        Self {
            base_fee_wei,
            priority_fee_wei: priority,
            block,
            fetched_at: Instant::now(),
            source: GasSource::ChainHead,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > Duration::from_millis(CACHE_DURATION_MS)
    }

    /// Priority fee for the given 1-based submission attempt, compounded by
    /// `escalation` for each resubmission
    pub fn priority_for_attempt(&self, attempt: u32, escalation: Bps) -> u128 {
        let mut fee = self.priority_fee_wei;
        for _ in 1..attempt.max(1) {
            fee = mul_div(fee, escalation.0 as u128, BPS_DENOMINATOR as u128).unwrap_or(MAX_FEE_WEI);
        }
        fee.min(MAX_FEE_WEI)
    }

    /// Effective price paid per gas unit on a first submission
    pub fn effective_gas_price(&self) -> u128 {
        (self.base_fee_wei + self.priority_fee_wei).min(MAX_FEE_WEI)
    }

    /// EIP-1559 fee cap: twice the base fee plus the tip, covering one full base fee doubling
    pub fn max_fee_per_gas(&self, priority_fee_wei: u128) -> u128 {
        (self.base_fee_wei * 2 + priority_fee_wei).min(MAX_FEE_WEI)
    }

    /// USD cost of `gas_units` at the effective price, given the native token price
    pub fn estimate_cost_usd(&self, gas_units: u64, native_usd: Usd) -> Usd {
        gas_cost_usd(gas_units, self.effective_gas_price(), native_usd)
    }

    pub fn gwei(wei: u128) -> f64 {
        wei as f64 / 1e9
    }
}

/// `gas_units × price_wei` native wei, converted at `native_usd` per whole token
pub fn gas_cost_usd(gas_units: u64, price_wei: u128, native_usd: Usd) -> Usd {
    let wei = (gas_units as u128).saturating_mul(price_wei);
    let micro = mul_div(wei, native_usd.0.max(0) as u128, WAD).unwrap_or(i128::MAX as u128);
    Usd(micro.min(i128::MAX as u128) as i128)
}

// ============================================
// GAS ORACLE
// ============================================

pub struct GasOracle {
    client: Arc<dyn ChainClient>,
    multiplier: Bps,
    cache: Arc<RwLock<Option<GasPriceInfo>>>,
}

impl GasOracle {
    pub fn new(client: Arc<dyn ChainClient>, multiplier: Bps) -> Self {
        Self {
            client,
            multiplier,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Current gas reading (with caching). A failed refresh falls back to the
    /// last reading when one exists; otherwise the chain error propagates.
    pub async fn current(&self) -> ArbResult<GasPriceInfo> {
        {
            let cache = self.cache.read().await;
            if let Some(ref info) = *cache {
                if !info.is_stale() {
                    trace!("Using cached base fee: {:.2} gwei", GasPriceInfo::gwei(info.base_fee_wei));
                    return Ok(info.clone());
                }
            }
        }

        match self.client.head().await {
            Ok(head) => {
                let info = GasPriceInfo::new(head.base_fee_wei, self.multiplier, head.number);
                debug!(
                    "⛽ Block {}: base {:.2} gwei, tip {:.2} gwei",
                    head.number,
                    GasPriceInfo::gwei(info.base_fee_wei),
                    GasPriceInfo::gwei(info.priority_fee_wei)
                );
                *self.cache.write().await = Some(info.clone());
                Ok(info)
            }
            Err(err) => {
                let cache = self.cache.read().await;
                match cache.as_ref() {
                    Some(info) => {
                        warn!("Gas refresh failed ({}), serving cached reading", err);
                        Ok(GasPriceInfo { source: GasSource::StaleCache, ..info.clone() })
                    }
                    None => Err(err),
                }
            }
        }
    }
}

// ============================================
// TESTS
// ============================================
