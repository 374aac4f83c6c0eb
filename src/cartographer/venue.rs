//! Venue registry and per-family quoting math.
//!
//! A [`Venue`] is immutable once registered. Its [`ProtocolFamily`] selects
//! the [`QuoteStrategy`] that knows which view calls to make against a pool
//! and how to turn the answers into decimal-normalized, post-fee rates.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ChainConfig, VenueConfig};
use crate::errors::{ArbError, ArbResult};
use crate::fixed::{normalize_amount, Bps, Ratio};

// ============================================
// POOL INTERFACES
// ============================================

sol! {
    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }

    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function liquidity() external view returns (uint128);
    }

    interface ICurvePool {
        function balances(uint256 i) external view returns (uint256);
        function get_dy(int128 i, int128 j, uint256 dx) external view returns (uint256);
        function exchange(int128 i, int128 j, uint256 dx, uint256 min_dy) external;
    }
}

// ============================================
// TYPES
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// x·y=k pools (Uniswap V2 and forks)
    ConstantProduct,
    /// Tick-range pools (Uniswap V3 and forks)
    ConcentratedLiquidity,
    /// Amplified invariant pools (Curve)
    StableSwap,
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolFamily::ConstantProduct => write!(f, "CP"),
            ProtocolFamily::ConcentratedLiquidity => write!(f, "CL"),
            ProtocolFamily::StableSwap => write!(f, "Stable"),
        }
    }
}

impl ProtocolFamily {
    pub fn quote_strategy(self) -> &'static dyn QuoteStrategy {
        match self {
            ProtocolFamily::ConstantProduct => &ConstantProductMath,
            ProtocolFamily::ConcentratedLiquidity => &ConcentratedLiquidityMath,
            ProtocolFamily::StableSwap => &StableSwapMath,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pool {
    pub address: Address,
    /// Coins in on-chain index order
    pub tokens: Vec<Address>,
    pub fee: Bps,
}

impl Pool {
    pub fn index_of(&self, token: &Address) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }

    pub fn connects(&self, a: &Address, b: &Address) -> bool {
        a != b && self.index_of(a).is_some() && self.index_of(b).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Venue {
    pub id: String,
    pub chain_id: u64,
    pub family: ProtocolFamily,
    pub router: Address,
    pub factory: Option<Address>,
    /// Default fee; pools may override it
    pub fee: Bps,
    pub pools: Vec<Pool>,
}

impl Venue {
    pub fn from_config(chain_id: u64, config: &VenueConfig) -> Self {
        let fee = Bps(config.fee_bps);
        Self {
            id: config.id.clone(),
            chain_id,
            family: config.family,
            router: config.router,
            factory: config.factory,
            fee,
            pools: config
                .pools
                .iter()
                .map(|p| Pool {
                    address: p.address,
                    tokens: p.tokens.clone(),
                    fee: p.fee_bps.map(Bps).unwrap_or(fee),
                })
                .collect(),
        }
    }

    /// Cheapest pool trading `token_in` against `token_out`
    pub fn pool_for(&self, token_in: &Address, token_out: &Address) -> Option<&Pool> {
        self.pools
            .iter()
            .filter(|p| p.connects(token_in, token_out))
            .min_by_key(|p| p.fee)
    }

    pub fn pool(&self, address: &Address) -> Option<&Pool> {
        self.pools.iter().find(|p| p.address == *address)
    }

    pub fn quote_strategy(&self) -> &'static dyn QuoteStrategy {
        self.family.quote_strategy()
    }
}

// ============================================
// REGISTRY
// ============================================

#[derive(Default)]
pub struct VenueRegistry {
    venues: HashMap<String, Arc<Venue>>,
    order: Vec<String>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chain(chain: &ChainConfig) -> ArbResult<Self> {
        let mut registry = Self::new();
        for venue in &chain.venues {
            registry.register(Venue::from_config(chain.chain_id, venue))?;
        }
        Ok(registry)
    }

    /// Venues are immutable once registered; re-registering an id is an error
    pub fn register(&mut self, venue: Venue) -> ArbResult<Arc<Venue>> {
        if self.venues.contains_key(&venue.id) {
            return Err(ArbError::Config(format!("venue '{}' registered twice", venue.id)));
        }
        let venue = Arc::new(venue);
        self.order.push(venue.id.clone());
        self.venues.insert(venue.id.clone(), venue.clone());
        Ok(venue)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Venue>> {
        self.venues.get(id).cloned()
    }

    /// Every venue, in registration order
    pub fn all(&self) -> Vec<Arc<Venue>> {
        self.order.iter().filter_map(|id| self.venues.get(id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }
}

// ============================================
// QUOTING STRATEGIES
// ============================================

/// Decoded pool state: raw reserves by coin index plus whole-token, post-fee
/// rates for every ordered coin pair `(i, j)`
#[derive(Debug, Clone, Default)]
pub struct PoolReading {
    pub reserves: Vec<u128>,
    pub rates: HashMap<(usize, usize), Ratio>,
}

pub trait QuoteStrategy: Send + Sync {
    /// View calls against the pool, in the order `decode` expects them back
    fn reads(&self, pool: &Pool, decimals: &[u8]) -> Vec<Bytes>;

    fn decode(&self, pool: &Pool, decimals: &[u8], returns: &[Bytes]) -> ArbResult<PoolReading>;
}

/// Whole-token rate `j per i` implied by reserves, net of `fee`
pub fn reserve_rate(reserve_in: u128, decimals_in: u8, reserve_out: u128, decimals_out: u8, fee: Bps) -> Option<Ratio> {
    let whole_in = normalize_amount(reserve_in, decimals_in)?;
    let whole_out = normalize_amount(reserve_out, decimals_out)?;
    if whole_in.is_zero() {
        return None;
    }
    whole_out.checked_div(whole_in)?.checked_mul(fee.complement().as_ratio())
}

fn two_sided(pool: &Pool, decimals: &[u8], r0: u128, r1: u128) -> ArbResult<PoolReading> {
    if r0 == 0 || r1 == 0 || decimals.len() < 2 {
        return Err(ArbError::InsufficientLiquidity(format!("pool {:?} is empty", pool.address)));
    }
    let mut rates = HashMap::new();
    if let Some(rate) = reserve_rate(r0, decimals[0], r1, decimals[1], pool.fee) {
        rates.insert((0, 1), rate);
    }
    if let Some(rate) = reserve_rate(r1, decimals[1], r0, decimals[0], pool.fee) {
        rates.insert((1, 0), rate);
    }
    Ok(PoolReading { reserves: vec![r0, r1], rates })
}

fn expect_returns(pool: &Pool, returns: &[Bytes], n: usize) -> ArbResult<()> {
    if returns.len() != n {
        return Err(ArbError::Encoding(format!(
            "pool {:?}: expected {} read results, got {}",
            pool.address,
            n,
            returns.len()
        )));
    }
    Ok(())
}

fn decode_err(pool: &Pool, err: impl std::fmt::Display) -> ArbError {
    ArbError::Encoding(format!("pool {:?}: {}", pool.address, err))
}

pub struct ConstantProductMath;

impl QuoteStrategy for ConstantProductMath {
    fn reads(&self, _pool: &Pool, _decimals: &[u8]) -> Vec<Bytes> {
        vec![IUniswapV2Pair::getReservesCall {}.abi_encode().into()]
    }

    fn decode(&self, pool: &Pool, decimals: &[u8], returns: &[Bytes]) -> ArbResult<PoolReading> {
        expect_returns(pool, returns, 1)?;
        let reserves = IUniswapV2Pair::getReservesCall::abi_decode_returns(&returns[0])
            .map_err(|e| decode_err(pool, e))?;
        two_sided(
            pool,
            decimals,
            reserves.reserve0.saturating_to::<u128>(),
            reserves.reserve1.saturating_to::<u128>(),
        )
    }
}

/// Quotes a tick-range pool at its current tick through virtual reserves:
/// `x = L / √P`, `y = L · √P`
pub struct ConcentratedLiquidityMath;

impl ConcentratedLiquidityMath {
    pub fn virtual_reserves(sqrt_price_x96: U256, liquidity: u128) -> Option<(u128, u128)> {
        if sqrt_price_x96.is_zero() || liquidity == 0 {
            return None;
        }
        let l = U256::from(liquidity);
        let x = (l << 96usize) / sqrt_price_x96;
        let y = (l * sqrt_price_x96) >> 96usize;
        Some((x.saturating_to::<u128>(), y.saturating_to::<u128>()))
    }
}

impl QuoteStrategy for ConcentratedLiquidityMath {
    fn reads(&self, _pool: &Pool, _decimals: &[u8]) -> Vec<Bytes> {
        vec![
            IUniswapV3Pool::slot0Call {}.abi_encode().into(),
            IUniswapV3Pool::liquidityCall {}.abi_encode().into(),
        ]
    }

    fn decode(&self, pool: &Pool, decimals: &[u8], returns: &[Bytes]) -> ArbResult<PoolReading> {
        expect_returns(pool, returns, 2)?;
        let slot0 = IUniswapV3Pool::slot0Call::abi_decode_returns(&returns[0]).map_err(|e| decode_err(pool, e))?;
        let liquidity =
            IUniswapV3Pool::liquidityCall::abi_decode_returns(&returns[1]).map_err(|e| decode_err(pool, e))?;

        let (x, y) = Self::virtual_reserves(U256::from(slot0.sqrtPriceX96), liquidity).ok_or_else(|| {
            ArbError::InsufficientLiquidity(format!("pool {:?} has no in-range liquidity", pool.address))
        })?;
        two_sided(pool, decimals, x, y)
    }
}

/// Curve pools: balances for depth, `get_dy` of one whole input token for the rate
pub struct StableSwapMath;

impl StableSwapMath {
    fn pairs(n: usize) -> impl Iterator<Item = (usize, usize)> {
        (0..n).flat_map(move |i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
    }
}

impl QuoteStrategy for StableSwapMath {
    fn reads(&self, pool: &Pool, decimals: &[u8]) -> Vec<Bytes> {
        let n = pool.tokens.len();
        let mut calls: Vec<Bytes> = (0..n)
            .map(|i| ICurvePool::balancesCall { i: U256::from(i) }.abi_encode().into())
            .collect();
        for (i, j) in Self::pairs(n) {
            let dx = U256::from(10u128.pow(decimals.get(i).copied().unwrap_or(18) as u32));
            calls.push(
                ICurvePool::get_dyCall { i: i as i128, j: j as i128, dx }
                    .abi_encode()
                    .into(),
            );
        }
        calls
    }

    fn decode(&self, pool: &Pool, decimals: &[u8], returns: &[Bytes]) -> ArbResult<PoolReading> {
        let n = pool.tokens.len();
        expect_returns(pool, returns, n + n * (n - 1))?;

        let mut reserves = Vec::with_capacity(n);
        for ret in &returns[..n] {
            let balance = ICurvePool::balancesCall::abi_decode_returns(ret).map_err(|e| decode_err(pool, e))?;
            reserves.push(balance.saturating_to::<u128>());
        }
        if reserves.iter().any(|r| *r == 0) {
            return Err(ArbError::InsufficientLiquidity(format!("pool {:?} has an empty coin", pool.address)));
        }

        let mut rates = HashMap::new();
        for ((i, j), ret) in Self::pairs(n).zip(&returns[n..]) {
            let dy = ICurvePool::get_dyCall::abi_decode_returns(ret).map_err(|e| decode_err(pool, e))?;
            // get_dy is already net of the pool fee
            if let Some(rate) = normalize_amount(dy.saturating_to::<u128>(), decimals.get(j).copied().unwrap_or(18)) {
                if !rate.is_zero() {
                    rates.insert((i, j), rate);
                }
            }
        }
        Ok(PoolReading { reserves, rates })
    }
}
