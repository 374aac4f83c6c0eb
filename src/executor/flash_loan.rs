//! Flash Loan Providers & Call Encoding
//!
//! Provider registry for one chain plus the ABI encoding of everything the
//! executor contract needs:
//! - Balancer V2 (0% fee)
//! - Aave V3 (`flashLoanSimple`, 0.05% fee)
//!
//! The transaction goes to the provider; the provider calls back into the
//! executor contract with the encoded swap plan, and the whole thing reverts
//! unless the loan plus fee is repaid.

use alloy_primitives::aliases::{U160, U24};
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use tracing::{debug, info};

use crate::brain::LoanQuoter;
use crate::cartographer::{ICurvePool, Pool, ProtocolFamily};
use crate::config::{ChainConfig, LoanProviderConfig, LoanProviderKind};
use crate::errors::{ArbError, ArbResult};
use crate::fixed::{denormalize_amount, Bps, Ratio};
use crate::ledger::FeedbackLedger;
use crate::tokens::TokenRegistry;

// ============================================
// SOLIDITY INTERFACES
// ============================================

sol! {
    /// Balancer V2 Vault interface for flash loans
    interface IBalancerVault {
        function flashLoan(
            address recipient,
            address[] memory tokens,
            uint256[] memory amounts,
            bytes memory userData
        ) external;
    }

    /// Aave V3 Pool, single-asset flash loan
    interface IAavePool {
        function flashLoanSimple(
            address receiverAddress,
            address asset,
            uint256 amount,
            bytes calldata params,
            uint16 referralCode
        ) external;
    }

    /// Payload the executor contract decodes inside the loan callback
    #[derive(Debug)]
    interface IArbitrageExecutor {
        /// One router or pool call. Spends `amountIn`, or the whole balance of
        /// `tokenIn` when less arrived, and requires `minAmountOut`.
        struct SwapCall {
            address target;
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint256 minAmountOut;
            bytes data;
        }

        struct CallbackPlan {
            SwapCall[] swaps;
            address asset;
            uint256 repayAmount;
            address profitRecipient;
        }

        function executeCallback(CallbackPlan calldata plan) external;
    }

    /// Uniswap V3 Router for swaps
    interface ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 deadline;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params)
            external payable returns (uint256 amountOut);
    }

    /// Uniswap V2 Router for swaps
    interface IUniswapV2Router {
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);
    }
}

// ============================================
// PROVIDER REGISTRY
// ============================================

#[derive(Debug, Clone)]
pub struct LoanProvider {
    pub id: String,
    pub kind: LoanProviderKind,
    pub address: Address,
    pub fee: Bps,
    /// Raw lendable amount per asset
    capacity: Vec<(Address, u128)>,
}

impl LoanProvider {
    pub fn new(id: &str, kind: LoanProviderKind, address: Address, fee: Bps, capacity: Vec<(Address, u128)>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            address,
            fee,
            capacity,
        }
    }

    /// Capacities in config are whole tokens; assets without known decimals are dropped
    pub fn from_config(config: &LoanProviderConfig, tokens: &TokenRegistry) -> Self {
        let capacity = config
            .capacity
            .iter()
            .filter_map(|c| {
                let decimals = tokens.decimals(&c.asset)?;
                let raw = denormalize_amount(Ratio::from_f64(c.max_tokens), decimals)?;
                Some((c.asset, raw))
            })
            .collect();
        Self::new(&config.id, config.kind, config.address, Bps(config.fee_bps), capacity)
    }

    pub fn capacity(&self, asset: &Address) -> u128 {
        self.capacity
            .iter()
            .find(|(a, _)| a == asset)
            .map(|(_, raw)| *raw)
            .unwrap_or(0)
    }

    pub fn can_supply(&self, asset: &Address, amount: u128) -> bool {
        amount > 0 && self.capacity(asset) >= amount
    }

    /// Fee in raw units of the borrowed asset, rounded up
    pub fn fee_amount(&self, amount: u128) -> u128 {
        let floor = self.fee.of_u128(amount);
        if self.fee.0 > 0 && floor == 0 && amount > 0 {
            return 1;
        }
        floor
    }
}

/// Every flash-loan provider on one chain
#[derive(Debug, Clone, Default)]
pub struct LoanProviderBook {
    providers: Vec<LoanProvider>,
}

impl LoanProviderBook {
    pub fn new(providers: Vec<LoanProvider>) -> Self {
        Self { providers }
    }

    pub fn from_chain(chain: &ChainConfig, tokens: &TokenRegistry) -> Self {
        let providers: Vec<LoanProvider> = chain
            .loan_providers
            .iter()
            .map(|p| LoanProvider::from_config(p, tokens))
            .collect();
        for p in &providers {
            info!("🏦 {} ({}) at {:?}: {} fee, {} assets", p.id, p.kind, p.address, p.fee, p.capacity.len());
        }
        Self::new(providers)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Lowest-fee provider able to lend `amount` of `asset`; equal fees go to
    /// the provider with the better ledger record
    pub fn select(&self, chain_id: u64, asset: &Address, amount: u128, ledger: &FeedbackLedger) -> Option<&LoanProvider> {
        self.providers
            .iter()
            .filter(|p| p.can_supply(asset, amount))
            .min_by(|a, b| {
                a.fee.cmp(&b.fee).then_with(|| {
                    let ra = ledger.provider_stats(chain_id, &a.id).reliability();
                    let rb = ledger.provider_stats(chain_id, &b.id).reliability();
                    rb.cmp(&ra)
                })
            })
    }
}

impl LoanQuoter for LoanProviderBook {
    fn loan_fee(&self, asset: &Address, amount: u128) -> Option<Bps> {
        self.providers
            .iter()
            .filter(|p| p.can_supply(asset, amount))
            .map(|p| p.fee)
            .min()
    }
}

// ============================================
// CALL ENCODING
// ============================================

/// Inputs for one encoded swap
#[derive(Debug, Clone, Copy)]
pub struct SwapRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: u128,
    pub min_out: u128,
    /// Receives the output, normally the executor contract
    pub recipient: Address,
    /// Unix seconds
    pub deadline: u64,
}

/// Router/pool calldata for one hop, chosen by protocol family
pub fn encode_swap(
    family: ProtocolFamily,
    router: Address,
    pool: &Pool,
    req: &SwapRequest,
) -> ArbResult<IArbitrageExecutor::SwapCall> {
    let amount_in = U256::from(req.amount_in);
    let min_out = U256::from(req.min_out);

    let (target, data) = match family {
        ProtocolFamily::ConstantProduct => {
            let call = IUniswapV2Router::swapExactTokensForTokensCall {
                amountIn: amount_in,
                amountOutMin: min_out,
                path: vec![req.token_in, req.token_out],
                to: req.recipient,
                deadline: U256::from(req.deadline),
            };
            (router, call.abi_encode())
        }
        ProtocolFamily::ConcentratedLiquidity => {
            // 30 bps -> 3000 in Uniswap V3 fee units
            let fee_units = pool.fee.0 * 100;
            let call = ISwapRouter::exactInputSingleCall {
                params: ISwapRouter::ExactInputSingleParams {
                    tokenIn: req.token_in,
                    tokenOut: req.token_out,
                    fee: U24::from(fee_units),
                    recipient: req.recipient,
                    deadline: U256::from(req.deadline),
                    amountIn: amount_in,
                    amountOutMinimum: min_out,
                    sqrtPriceLimitX96: U160::ZERO,
                },
            };
            (router, call.abi_encode())
        }
        ProtocolFamily::StableSwap => {
            let i = pool.index_of(&req.token_in);
            let j = pool.index_of(&req.token_out);
            let (Some(i), Some(j)) = (i, j) else {
                return Err(ArbError::Encoding(format!(
                    "pool {:?} does not hold {:?}/{:?}",
                    pool.address, req.token_in, req.token_out
                )));
            };
            let call = ICurvePool::exchangeCall {
                i: i as i128,
                j: j as i128,
                dx: amount_in,
                min_dy: min_out,
            };
            // Curve pools are called directly
            (pool.address, call.abi_encode())
        }
    };

    Ok(IArbitrageExecutor::SwapCall {
        target,
        tokenIn: req.token_in,
        tokenOut: req.token_out,
        amountIn: amount_in,
        minAmountOut: min_out,
        data: Bytes::from(data),
    })
}

/// Callback payload: ordered swaps, then repay `repay_amount` of `asset`
/// and sweep the rest to `profit_recipient`
pub fn encode_callback(
    swaps: Vec<IArbitrageExecutor::SwapCall>,
    asset: Address,
    repay_amount: u128,
    profit_recipient: Address,
) -> Bytes {
    let call = IArbitrageExecutor::executeCallbackCall {
        plan: IArbitrageExecutor::CallbackPlan {
            swaps,
            asset,
            repayAmount: U256::from(repay_amount),
            profitRecipient: profit_recipient,
        },
    };
    Bytes::from(call.abi_encode())
}

/// The provider call that opens the loan. Returns `(to, calldata)`.
pub fn encode_flash_loan(
    provider: &LoanProvider,
    receiver: Address,
    asset: Address,
    amount: u128,
    callback: Bytes,
) -> (Address, Bytes) {
    let data = match provider.kind {
        LoanProviderKind::BalancerV2 => IBalancerVault::flashLoanCall {
            recipient: receiver,
            tokens: vec![asset],
            amounts: vec![U256::from(amount)],
            userData: callback,
        }
        .abi_encode(),
        LoanProviderKind::AaveV3 => IAavePool::flashLoanSimpleCall {
            receiverAddress: receiver,
            asset,
            amount: U256::from(amount),
            params: callback,
            referralCode: 0,
        }
        .abi_encode(),
    };
    debug!("Encoded {} flash loan: {} bytes", provider.kind, data.len());
    (provider.address, Bytes::from(data))
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn book() -> LoanProviderBook {
        LoanProviderBook::new(vec![
            LoanProvider::new("aave", LoanProviderKind::AaveV3, Address::repeat_byte(1), Bps(5), vec![(asset(), 1_000_000)]),
            LoanProvider::new("balancer", LoanProviderKind::BalancerV2, Address::repeat_byte(2), Bps::ZERO, vec![(asset(), 1_000)]),
        ])
    }

    #[test]
    fn test_selection_prefers_cheapest_with_capacity() {
        let ledger = FeedbackLedger::new();
        let book = book();
        assert_eq!(book.select(1, &asset(), 500, &ledger).unwrap().id, "balancer");
        // Over Balancer's capacity
        assert_eq!(book.select(1, &asset(), 5_000, &ledger).unwrap().id, "aave");
        assert!(book.select(1, &asset(), 5_000_000, &ledger).is_none());
        assert!(book.select(1, &Address::ZERO, 1, &ledger).is_none());

        assert_eq!(book.loan_fee(&asset(), 500), Some(Bps::ZERO));
        assert_eq!(book.loan_fee(&asset(), 5_000), Some(Bps(5)));
    }

    #[test]
    fn test_equal_fees_break_on_reliability() {
        use crate::ledger::{InclusionOutcome, SubmissionResult};
        use crate::fixed::Usd;

        let ledger = FeedbackLedger::new();
        ledger.append(SubmissionResult {
            opportunity_id: 1,
            chain_id: 1,
            asset: asset(),
            provider: "first".into(),
            venues: vec!["uni".into()],
            outcome: InclusionOutcome::Reverted,
            failure: None,
            expected_profit: Usd::from_whole(5),
            realized_profit: Usd::from_whole(-1),
            gas_used: 1,
            gas_cost: Usd::from_whole(1),
            block: Some(1),
            attempts: 1,
            recorded_at: chrono::Utc::now(),
        });
        let book = LoanProviderBook::new(vec![
            LoanProvider::new("first", LoanProviderKind::AaveV3, Address::repeat_byte(1), Bps(5), vec![(asset(), 100)]),
            LoanProvider::new("second", LoanProviderKind::AaveV3, Address::repeat_byte(2), Bps(5), vec![(asset(), 100)]),
        ]);
        assert_eq!(book.select(1, &asset(), 10, &ledger).unwrap().id, "second");
    }

    #[test]
    fn test_fee_amount_rounds_up() {
        let aave = LoanProvider::new("aave", LoanProviderKind::AaveV3, Address::ZERO, Bps(5), vec![]);
        assert_eq!(aave.fee_amount(1_000_000), 500);
        assert_eq!(aave.fee_amount(10), 1);
        let balancer = LoanProvider::new("bal", LoanProviderKind::BalancerV2, Address::ZERO, Bps::ZERO, vec![]);
        assert_eq!(balancer.fee_amount(10), 0);
    }

    #[test]
    fn test_swap_encoding_per_family() {
        let a = Address::repeat_byte(0xa);
        let b = Address::repeat_byte(0xb);
        let pool = Pool { address: Address::repeat_byte(0x11), tokens: vec![a, b], fee: Bps(5) };
        let router = Address::repeat_byte(0x22);
        let req = SwapRequest { token_in: b, token_out: a, amount_in: 1_000, min_out: 990, recipient: Address::repeat_byte(0x33), deadline: 1 };

        let v2 = encode_swap(ProtocolFamily::ConstantProduct, router, &pool, &req).unwrap();
        assert_eq!(v2.target, router);
        assert_eq!(&v2.data[..4], &IUniswapV2Router::swapExactTokensForTokensCall::SELECTOR);

        let v3 = encode_swap(ProtocolFamily::ConcentratedLiquidity, router, &pool, &req).unwrap();
        let decoded = ISwapRouter::exactInputSingleCall::abi_decode(&v3.data).unwrap();
        assert_eq!(decoded.params.fee, U24::from(500u32));
        assert_eq!(decoded.params.amountOutMinimum, U256::from(990u64));

        let curve = encode_swap(ProtocolFamily::StableSwap, router, &pool, &req).unwrap();
        assert_eq!(curve.target, pool.address);
        let decoded = ICurvePool::exchangeCall::abi_decode(&curve.data).unwrap();
        assert_eq!((decoded.i, decoded.j), (1, 0));

        let stranger = SwapRequest { token_in: Address::ZERO, ..req };
        assert!(encode_swap(ProtocolFamily::StableSwap, router, &pool, &stranger).is_err());
    }

    #[test]
    fn test_flash_loan_targets_provider() {
        let book = book();
        let ledger = FeedbackLedger::new();
        let callback = encode_callback(vec![], asset(), 1_000, Address::repeat_byte(9));

        let aave = book.select(1, &asset(), 5_000, &ledger).unwrap();
        let (to, data) = encode_flash_loan(aave, Address::repeat_byte(7), asset(), 5_000, callback.clone());
        assert_eq!(to, aave.address);
        let decoded = IAavePool::flashLoanSimpleCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.amount, U256::from(5_000u64));
        assert_eq!(decoded.params, callback);

        let balancer = book.select(1, &asset(), 500, &ledger).unwrap();
        let (to, data) = encode_flash_loan(balancer, Address::repeat_byte(7), asset(), 500, callback);
        assert_eq!(to, balancer.address);
        assert_eq!(&data[..4], &IBalancerVault::flashLoanCall::SELECTOR);
    }
}
