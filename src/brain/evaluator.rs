//! Profit & Risk Evaluator
//!
//! Scores candidate paths and decides which are worth executing.
//!
//! For a trade of `input` USD through a path with rate product `P`:
//!
//! ```text
//! gross    = input × P − input
//! net      = gross − gas − loan fee − slippage
//! slippage = Σ x_k × x_k / (L_k + x_k)      (x_k: USD into hop k, L_k: hop depth)
//! ```
//!
//! Each path is scored at several fractions of the maximum trade size and
//! the best net result is kept. An opportunity is viable when its net profit
//! clears the (calibrated) minimum and its risk score stays under the cap.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use console::style;
use std::collections::HashMap;
use tracing::{debug, info};

use super::opportunity::{Opportunity, OpportunityState};
use super::path_finder::Path;
use crate::config::{ChainConfig, Config, GasModel, RiskWeights};
use crate::errors::{ArbError, ArbResult};
use crate::fixed::{Bps, Ratio, Usd, BPS_DENOMINATOR};
use crate::gas_oracle::gas_cost_usd;
use crate::ledger::FeedbackLedger;
use crate::tokens::TokenRegistry;

/// Trade sizes tried, as fractions of the maximum trade
pub const SIZE_STEPS: [Bps; 4] = [Bps(10_000), Bps(5_000), Bps(2_500), Bps(1_000)];

/// A trade at 1/20th of a hop's depth is treated as maximum depth risk
const DEPTH_RISK_MULTIPLIER: u64 = 20;

/// Inclusions looked at when calibrating the profit threshold
const CALIBRATION_WINDOW: usize = 50;

// ============================================
// CONTEXT
// ============================================

/// Flash-loan pricing as seen by the evaluator
pub trait LoanQuoter: Send + Sync {
    /// Fee of the cheapest provider able to lend `amount` raw units of `asset`
    fn loan_fee(&self, asset: &Address, amount: u128) -> Option<Bps>;
}

/// Per-tick market inputs for scoring
pub struct ScoringContext<'a> {
    pub tokens: &'a TokenRegistry,
    pub loans: &'a dyn LoanQuoter,
    /// Base fee plus priority fee
    pub gas_price_wei: u128,
    pub now: DateTime<Utc>,
}

/// Fraction of a hop's output lost to price impact: `x / (L + x)`
pub fn hop_impact(input_usd: Usd, liquidity_usd: Usd) -> Ratio {
    let x = input_usd.0.max(0) as u128;
    let depth = liquidity_usd.0.max(0) as u128;
    Ratio::from_fraction(x, depth.saturating_add(x)).unwrap_or(Ratio::ONE)
}

// ============================================
// SCORE
// ============================================

/// Breakdown of one path at one trade size
#[derive(Debug, Clone, Copy)]
pub struct Score {
    pub input_usd: Usd,
    pub input_amount: u128,
    pub gross: Usd,
    pub gas_units: u64,
    pub gas: Usd,
    pub loan_fee: Usd,
    pub slippage: Usd,
    pub net: Usd,
    pub risk: Bps,
}

impl Score {
    /// Output over input after modeled slippage, before gas and fees
    pub fn slippage_adjusted_ratio(&self) -> Ratio {
        let out = self.input_usd + self.gross - self.slippage;
        out.ratio_to(self.input_usd).unwrap_or(Ratio::ZERO)
    }
}

// ============================================
// EVALUATOR
// ============================================

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub min_profit: Usd,
    pub max_risk: Bps,
    pub max_trade: Usd,
    pub safety_margin: Bps,
    pub max_quote_age_ms: u64,
    pub weights: RiskWeights,
    pub gas: GasModel,
}

impl EvaluatorConfig {
    pub fn from_config(config: &Config, chain: &ChainConfig) -> Self {
        Self {
            min_profit: config.min_profit(),
            max_risk: Bps(config.max_risk_bps),
            max_trade: config.max_trade(),
            safety_margin: config.safety_margin(),
            max_quote_age_ms: config.max_quote_age_ms,
            weights: config.risk_weights,
            gas: chain.gas,
        }
    }
}

pub struct Evaluator {
    chain_id: u64,
    config: EvaluatorConfig,
    /// Threshold in force after calibration
    min_profit: Usd,
    venue_failure: HashMap<String, Bps>,
}

impl Evaluator {
    pub fn new(chain_id: u64, config: EvaluatorConfig) -> Self {
        Self {
            chain_id,
            min_profit: config.min_profit,
            config,
            venue_failure: HashMap::new(),
        }
    }

    pub fn min_profit(&self) -> Usd {
        self.min_profit
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Score `path` at one trade size. `None` when the start token is unpriced
    /// or no provider can lend that much.
    pub fn score_at(&self, path: &Path, input_usd: Usd, ctx: &ScoringContext<'_>) -> Option<Score> {
        let asset = path.start_token();
        let input_amount = ctx.tokens.raw_for_usd(&asset, input_usd)?;
        if input_amount == 0 {
            return None;
        }

        let loan_amount = input_amount.checked_add(self.config.safety_margin.of_u128(input_amount))?;
        let fee_bps = ctx.loans.loan_fee(&asset, loan_amount)?;
        let loan_usd = input_usd + input_usd.mul_bps(self.config.safety_margin);
        let loan_fee = loan_usd.mul_bps(fee_bps);

        let product = path.rate_product()?;
        let gross = input_usd.mul_ratio(product) - input_usd;

        let mut slippage = Usd::ZERO;
        let mut flowing = input_usd;
        for hop in &path.hops {
            let lost = flowing.mul_ratio(hop_impact(flowing, hop.quote.liquidity_usd));
            slippage += lost;
            flowing -= lost;
        }

        let gas_units = self.config.gas.units_for(path.len());
        let gas = gas_cost_usd(gas_units, ctx.gas_price_wei, ctx.tokens.native_usd());

        Some(Score {
            input_usd,
            input_amount,
            gross,
            gas_units,
            gas,
            loan_fee,
            slippage,
            net: gross - gas - loan_fee - slippage,
            risk: self.risk_score(path, input_usd, ctx.now),
        })
    }

    /// Composite risk in bps: trade-to-depth ratio of the shallowest hop,
    /// age of the oldest quote, and worst venue failure rate from the ledger
    pub fn risk_score(&self, path: &Path, input_usd: Usd, now: DateTime<Utc>) -> Bps {
        let input = input_usd.0.max(0) as u128;
        let depth = path
            .hops
            .iter()
            .map(|h| {
                let liquidity = h.quote.liquidity_usd.0.max(1) as u128;
                let ratio = input.saturating_mul(BPS_DENOMINATOR as u128) / liquidity;
                ratio.saturating_mul(DEPTH_RISK_MULTIPLIER as u128)
            })
            .max()
            .unwrap_or(0)
            .min(BPS_DENOMINATOR as u128) as u64;

        let staleness = if self.config.max_quote_age_ms == 0 {
            0
        } else {
            (path.max_quote_age_ms(now) * BPS_DENOMINATOR as u64 / self.config.max_quote_age_ms)
                .min(BPS_DENOMINATOR as u64)
        };

        let reliability = path
            .hops
            .iter()
            .filter_map(|h| self.venue_failure.get(h.venue()))
            .map(|b| b.0 as u64)
            .max()
            .unwrap_or(0);

        let w = &self.config.weights;
        let composite = (depth * w.depth_bps as u64
            + staleness * w.staleness_bps as u64
            + reliability * w.reliability_bps as u64)
            / BPS_DENOMINATOR as u64;
        Bps(composite.min(BPS_DENOMINATOR as u64) as u32)
    }

    /// Detected → Scored, sized at the best of the trade-size sweep.
    /// Stale, unpriced or unfundable paths go straight to Rejected.
    pub fn score(&self, opp: &mut Opportunity, ctx: &ScoringContext<'_>) -> ArbResult<()> {
        let age_ms = opp.path.max_quote_age_ms(ctx.now);
        if age_ms > self.config.max_quote_age_ms {
            let err = ArbError::StaleData {
                what: "path quotes".into(),
                age_ms,
                limit_ms: self.config.max_quote_age_ms,
            };
            return opp.reject(err.to_string());
        }

        let shallowest = opp.path.min_liquidity();
        let mut best: Option<Score> = None;
        for step in SIZE_STEPS {
            let size = self.config.max_trade.mul_bps(step);
            if size >= shallowest {
                continue;
            }
            let Some(score) = self.score_at(&opp.path, size, ctx) else {
                continue;
            };
            debug!(
                "  Size {}: gross {} gas {} fee {} slip {} net {}",
                size, score.gross, score.gas, score.loan_fee, score.slippage, score.net
            );
            if best.map(|b| score.net > b.net).unwrap_or(true) {
                best = Some(score);
            }
        }

        let Some(score) = best else {
            let reason = if shallowest <= self.config.max_trade.mul_bps(SIZE_STEPS[SIZE_STEPS.len() - 1]) {
                ArbError::InsufficientLiquidity(format!("shallowest hop holds {}", shallowest)).to_string()
            } else {
                "no priced or fundable trade size".to_string()
            };
            return opp.reject(reason);
        };

        opp.input_amount = score.input_amount;
        opp.input_usd = score.input_usd;
        opp.expected_gross_profit = score.gross;
        opp.gas_units = score.gas_units;
        opp.gas_estimate = score.gas;
        opp.flash_loan_fee = score.loan_fee;
        opp.slippage_estimate = score.slippage;
        opp.net_profit = score.net;
        opp.risk_score = score.risk;

        opp.transition(
            OpportunityState::Scored,
            format!("net {} on {} (risk {})", score.net, score.input_usd, score.risk),
        )
    }

    /// Scored → Viable | Rejected
    pub fn decide(&self, opp: &mut Opportunity) -> ArbResult<bool> {
        if opp.net_profit < self.min_profit {
            opp.reject(format!("net {} below minimum {}", opp.net_profit, self.min_profit))?;
            return Ok(false);
        }
        if opp.risk_score > self.config.max_risk {
            opp.reject(format!("risk {} above cap {}", opp.risk_score, self.config.max_risk))?;
            return Ok(false);
        }
        opp.transition(OpportunityState::Viable, format!("clears {}", self.min_profit))?;
        Ok(true)
    }

    /// Full scoring pass for one path. The returned opportunity is either
    /// Viable or terminally Rejected.
    pub fn evaluate(&self, path: Path, ctx: &ScoringContext<'_>) -> ArbResult<Opportunity> {
        let mut opp = Opportunity::detected(self.chain_id, path);
        self.score(&mut opp, ctx)?;
        if opp.state() == OpportunityState::Scored && self.decide(&mut opp)? {
            info!(
                "{}",
                style(format!(
                    "💰 PROFITABLE: {} | Size: {} | Gross: {} | Gas: {} | Fee: {} | Slip: {} | Net: {} ({} bps)",
                    opp.path.describe(ctx.tokens),
                    opp.input_usd,
                    opp.expected_gross_profit,
                    opp.gas_estimate,
                    opp.flash_loan_fee,
                    opp.slippage_estimate,
                    opp.net_profit,
                    opp.net_profit.bps_of(opp.input_usd)
                ))
                .green()
                .bold()
            );
        }
        Ok(opp)
    }

    /// Pull venue failure rates and realized shortfall from the ledger. The
    /// profit threshold never exceeds twice its configured base.
    pub fn calibrate(&mut self, ledger: &FeedbackLedger) {
        self.venue_failure = ledger.venue_failure_rates(self.chain_id);

        let base = self.config.min_profit;
        let shortfall = ledger.average_shortfall(self.chain_id, CALIBRATION_WINDOW);
        let calibrated = base + shortfall.min(base.max(Usd::ZERO));
        if calibrated != self.min_profit {
            info!(
                "📐 Chain {}: min profit {} -> {} (avg shortfall {})",
                self.chain_id, self.min_profit, calibrated, shortfall
            );
            self.min_profit = calibrated;
        }
    }

    pub fn venue_failure_rate(&self, venue: &str) -> Bps {
        self.venue_failure.get(venue).copied().unwrap_or(Bps::ZERO)
    }
}
