//! Execution Planner
//!
//! Turns a Viable opportunity into an all-or-nothing transaction:
//! borrow → ordered swaps, each with a min-output guard → repay loan + fee →
//! sweep what is left to the operator.
//!
//! The safety margin is extra borrowed input pushed through the swaps. The
//! per-hop guard only absorbs slippage and never includes the margin.

use alloy_primitives::{Address, Bytes};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::flash_loan::{encode_callback, encode_flash_loan, encode_swap, IArbitrageExecutor, LoanProviderBook, SwapRequest};
use crate::brain::{hop_impact, Opportunity, OpportunityState};
use crate::cartographer::VenueRegistry;
use crate::config::{ChainConfig, Config, LoanProviderKind};
use crate::errors::{ArbError, ArbResult};
use crate::fixed::{denormalize_amount, normalize_amount, Bps, Ratio, Usd};
use crate::ledger::FeedbackLedger;
use crate::tokens::TokenRegistry;

/// Swap deadline handed to routers, relative to planning time
const DEADLINE_SECS: i64 = 120;

/// Headroom over the modeled gas units
const GAS_LIMIT_NUMERATOR: u64 = 3;
const GAS_LIMIT_DENOMINATOR: u64 = 2;

/// One guarded swap inside the callback
#[derive(Debug, Clone)]
pub struct PlannedSwap {
    pub venue: String,
    pub pool: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: u128,
    pub expected_out: u128,
    pub min_out: u128,
    pub call: IArbitrageExecutor::SwapCall,
}

/// Everything the submission manager needs to sign and send
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub opportunity_id: u64,
    pub chain_id: u64,
    pub asset: Address,

    pub provider_id: String,
    pub provider_kind: LoanProviderKind,

    /// Raw amount borrowed: input plus the safety margin
    pub loan_amount: u128,
    /// Raw input the opportunity was scored at
    pub input_amount: u128,
    pub loan_fee_amount: u128,
    pub repay_amount: u128,

    pub swaps: Vec<PlannedSwap>,
    pub profit_recipient: Address,

    /// Raw amount of the asset left after repayment, if every hop fills as modeled
    pub expected_surplus: u128,
    pub expected_profit: Usd,
    pub gas_units: u64,
    pub gas_limit: u64,

    /// Flash-loan provider and the calldata opening the loan
    pub to: Address,
    pub calldata: Bytes,

    pub built_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn final_expected_out(&self) -> u128 {
        self.swaps.last().map(|s| s.expected_out).unwrap_or(0)
    }
}

pub struct ExecutionPlanner {
    chain_id: u64,
    executor: Address,
    profit_recipient: Address,
    tokens: Arc<TokenRegistry>,
    venues: Arc<VenueRegistry>,
    providers: Arc<LoanProviderBook>,
    ledger: Arc<FeedbackLedger>,
    slippage_tolerance: Bps,
    safety_margin: Bps,
    max_quote_age_ms: u64,
}

impl ExecutionPlanner {
    pub fn new(
        config: &Config,
        chain: &ChainConfig,
        tokens: Arc<TokenRegistry>,
        venues: Arc<VenueRegistry>,
        providers: Arc<LoanProviderBook>,
        ledger: Arc<FeedbackLedger>,
    ) -> Self {
        // Zero addresses only survive config validation outside Production
        let executor = chain.executor_address.unwrap_or(Address::ZERO);
        Self {
            chain_id: chain.chain_id,
            executor,
            profit_recipient: chain.operator_address.unwrap_or(executor),
            tokens,
            venues,
            providers,
            ledger,
            slippage_tolerance: config.slippage_tolerance(),
            safety_margin: config.safety_margin(),
            max_quote_age_ms: config.max_quote_age_ms,
        }
    }

    /// Build the plan for a Viable opportunity and move it to Planned.
    ///
    /// Stale quotes expire the opportunity; a missing loan provider or an
    /// output that cannot cover repayment rejects it. Either way the
    /// opportunity ends terminal and the error is returned.
    pub fn plan(&self, opp: &mut Opportunity, now: DateTime<Utc>) -> ArbResult<ExecutionPlan> {
        if opp.state() != OpportunityState::Viable {
            return Err(ArbError::InvalidTransition {
                from: opp.state().to_string(),
                to: OpportunityState::Planned.to_string(),
            });
        }

        let age_ms = opp.path.max_quote_age_ms(now);
        if age_ms > self.max_quote_age_ms {
            let err = ArbError::StaleData {
                what: format!("quotes for opportunity #{}", opp.id),
                age_ms,
                limit_ms: self.max_quote_age_ms,
            };
            opp.expire(err.to_string())?;
            return Err(err);
        }

        let asset = opp.asset();
        let loan_amount = opp
            .input_amount
            .checked_add(self.safety_margin.of_u128(opp.input_amount))
            .ok_or_else(|| ArbError::Encoding("loan amount overflow".into()))?;

        let Some(provider) = self.providers.select(self.chain_id, &asset, loan_amount, &self.ledger) else {
            let err = ArbError::ProviderUnavailable {
                asset: self.tokens.symbol(&asset),
                amount: loan_amount.to_string(),
            };
            opp.reject(err.to_string())?;
            return Err(err);
        };

        let loan_fee_amount = provider.fee_amount(loan_amount);
        let repay_amount = loan_amount.saturating_add(loan_fee_amount);
        let deadline = (now.timestamp() + DEADLINE_SECS).max(0) as u64;

        let swaps = match self.plan_swaps(opp, loan_amount, deadline) {
            Ok(swaps) => swaps,
            Err(err) => {
                opp.reject(err.to_string())?;
                return Err(err);
            }
        };

        let final_out = swaps.last().map(|s| s.expected_out).unwrap_or(0);
        if final_out <= repay_amount {
            let err = ArbError::InsufficientLiquidity(format!(
                "planned output {} {} does not cover repayment {}",
                final_out,
                self.tokens.symbol(&asset),
                repay_amount
            ));
            opp.reject(err.to_string())?;
            return Err(err);
        }
        let expected_surplus = final_out - repay_amount;

        let calls = swaps.iter().map(|s| s.call.clone()).collect();
        let callback = encode_callback(calls, asset, repay_amount, self.profit_recipient);
        let (to, calldata) = encode_flash_loan(provider, self.executor, asset, loan_amount, callback);

        let plan = ExecutionPlan {
            opportunity_id: opp.id,
            chain_id: self.chain_id,
            asset,
            provider_id: provider.id.clone(),
            provider_kind: provider.kind,
            loan_amount,
            input_amount: opp.input_amount,
            loan_fee_amount,
            repay_amount,
            swaps,
            profit_recipient: self.profit_recipient,
            expected_surplus,
            expected_profit: opp.net_profit,
            gas_units: opp.gas_units,
            gas_limit: opp.gas_units * GAS_LIMIT_NUMERATOR / GAS_LIMIT_DENOMINATOR,
            to,
            calldata,
            built_at: now,
        };

        opp.transition(
            OpportunityState::Planned,
            format!("borrow {} via {} ({})", loan_amount, provider.id, provider.fee),
        )?;

        info!(
            "📝 Plan #{}: {} {} via {} | {} swaps | repay {} | surplus {}",
            plan.opportunity_id,
            plan.loan_amount,
            self.tokens.symbol(&asset),
            plan.provider_id,
            plan.swaps.len(),
            plan.repay_amount,
            plan.expected_surplus
        );

        Ok(plan)
    }

    /// Chain the hops, each fed the previous hop's expected output
    fn plan_swaps(&self, opp: &Opportunity, loan_amount: u128, deadline: u64) -> ArbResult<Vec<PlannedSwap>> {
        let mut swaps = Vec::with_capacity(opp.path.len());
        let mut amount_in = loan_amount;

        for hop in &opp.path.hops {
            let venue = self
                .venues
                .get(hop.venue())
                .ok_or_else(|| ArbError::Encoding(format!("unknown venue {}", hop.venue())))?;
            let pool = venue
                .pool(&hop.pool())
                .ok_or_else(|| ArbError::Encoding(format!("{} has no pool {:?}", venue.id, hop.pool())))?;

            let expected_out = self.expected_output(hop.token_in(), hop.token_out(), amount_in, hop.quote.price_ratio, hop.quote.liquidity_usd)?;
            let min_out = self.slippage_tolerance.complement().of_u128(expected_out);

            let call = encode_swap(
                venue.family,
                venue.router,
                pool,
                &SwapRequest {
                    token_in: hop.token_in(),
                    token_out: hop.token_out(),
                    amount_in,
                    min_out,
                    recipient: self.executor,
                    deadline,
                },
            )?;

            debug!(
                "  {} {:?} -> {:?}: in {} expect {} min {}",
                venue.id,
                hop.token_in(),
                hop.token_out(),
                amount_in,
                expected_out,
                min_out
            );

            swaps.push(PlannedSwap {
                venue: venue.id.clone(),
                pool: pool.address,
                token_in: hop.token_in(),
                token_out: hop.token_out(),
                amount_in,
                expected_out,
                min_out,
                call,
            });
            amount_in = expected_out;
        }

        Ok(swaps)
    }

    /// Raw output of one hop: quoted rate less modeled price impact,
    /// converted between the two tokens' decimals
    fn expected_output(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: u128,
        rate: Ratio,
        liquidity: Usd,
    ) -> ArbResult<u128> {
        let unknown = |t: &Address| ArbError::Encoding(format!("token {:?} has no decimals", t));
        let decimals_in = self.tokens.decimals(&token_in).ok_or_else(|| unknown(&token_in))?;
        let decimals_out = self.tokens.decimals(&token_out).ok_or_else(|| unknown(&token_out))?;

        let flowing_usd = self.tokens.usd_value(&token_in, amount_in).unwrap_or(Usd::ZERO);
        let kept = Ratio::ONE.saturating_sub(hop_impact(flowing_usd, liquidity));

        normalize_amount(amount_in, decimals_in)
            .and_then(|whole| whole.checked_mul(rate))
            .and_then(|out| out.checked_mul(kept))
            .and_then(|out| denormalize_amount(out, decimals_out))
            .ok_or_else(|| ArbError::Encoding(format!("amount overflow on {:?} -> {:?}", token_in, token_out)))
    }
}

#[cfg(test)]
impl ExecutionPlanner {
    pub(crate) fn for_test(tokens: Arc<TokenRegistry>, venues: Arc<VenueRegistry>, providers: Arc<LoanProviderBook>, safety_margin: Bps) -> Self {
        Self {
            chain_id: 1,
            executor: Address::repeat_byte(0xee),
            profit_recipient: Address::repeat_byte(0x0f),
            tokens,
            venues,
            providers,
            ledger: Arc::new(FeedbackLedger::new()),
            slippage_tolerance: Bps(50),
            safety_margin,
            max_quote_age_ms: 6_000,
        }
    }
}
