//! Venue Price Feed - MULTICALL3 Edition
//!
//! Normalizes per-venue pool reads into [`Quote`]s. All view calls for one
//! venue go out in a single Multicall3 batch; pools whose reads fail or whose
//! depth is under the liquidity floor are skipped, never fatal.
//!
//! [`collect_quotes`] fans out one task per venue through a bounded pool with
//! independent timeouts. A failing venue marks the batch partial; only
//! cross-cutting failures (every RPC endpoint down) abort the tick.

use alloy_primitives::{address, Address, Bytes};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::venue::{Pool, ProtocolFamily, Venue};
use crate::errors::{ArbError, ArbResult};
use crate::fixed::{normalize_amount, Bps, Ratio, Usd};
use crate::rpc::ChainClient;
use crate::tokens::TokenRegistry;

// ============================================
// MULTICALL3 INTERFACE
// ============================================

sol! {
    /// Multicall3 - deployed at same address on all EVM chains
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);
    }
}

/// Multicall3 address (same on all EVM chains)
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// Maximum calls per batch (to avoid gas limits)
const MAX_CALLS_PER_BATCH: usize = 100;

// ============================================
// QUOTE
// ============================================

/// One directed rate on one venue. Superseded every tick, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub venue: String,
    pub family: ProtocolFamily,
    pub pool: Address,
    pub token_in: Address,
    pub token_out: Address,

    /// Whole `token_out` received per whole `token_in`, after the pool fee
    pub price_ratio: Ratio,

    pub fee: Bps,

    /// USD depth on the input side of the pool
    pub liquidity_usd: Usd,

    pub observed_at: DateTime<Utc>,
    pub block: u64,
}

impl Quote {
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.observed_at).num_milliseconds().max(0) as u64
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age_ms: u64) -> bool {
        self.age_ms(now) > max_age_ms
    }

    /// Rate with the fee backed out
    pub fn mid_ratio(&self) -> Option<Ratio> {
        self.price_ratio.checked_div(self.fee.complement().as_ratio())
    }

    /// Edge weight for the quote graph
    pub fn weight(&self) -> f64 {
        self.price_ratio.neg_ln()
    }

    #[cfg(test)]
    pub fn new_for_test(
        venue: &str,
        token_in: Address,
        token_out: Address,
        price_ratio: Ratio,
        fee: Bps,
        liquidity_usd: Usd,
    ) -> Self {
        // Both directions of a pair on one venue share a pool
        let (lo, hi) = if token_in < token_out { (token_in, token_out) } else { (token_out, token_in) };
        let seed = [venue.as_bytes(), lo.as_slice(), hi.as_slice()].concat();
        let pool = Address::from_slice(&alloy_primitives::keccak256(seed)[12..]);
        Self {
            venue: venue.to_string(),
            family: ProtocolFamily::ConstantProduct,
            pool,
            token_in,
            token_out,
            price_ratio,
            fee,
            liquidity_usd,
            observed_at: Utc::now(),
            block: 1,
        }
    }
}

// ============================================
// FEED INTERFACE
// ============================================

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Quotes for every directed pair the venue's pools can trade
    async fn venue_quotes(&self, venue: &Venue) -> ArbResult<Vec<Quote>>;

    async fn get_quote(&self, venue: &Venue, token_in: Address, token_out: Address) -> ArbResult<Quote> {
        self.venue_quotes(venue)
            .await?
            .into_iter()
            .filter(|q| q.token_in == token_in && q.token_out == token_out)
            .max_by_key(|q| q.price_ratio)
            .ok_or_else(|| {
                ArbError::InsufficientLiquidity(format!(
                    "{} has no quotable pool for {:?} -> {:?}",
                    venue.id, token_in, token_out
                ))
            })
    }
}

// ============================================
// ON-CHAIN FEED
// ============================================

pub struct OnChainFeed {
    client: Arc<dyn ChainClient>,
    tokens: Arc<TokenRegistry>,
    min_liquidity: Usd,
    /// Chain head older than this is reported as stale
    max_head_lag_ms: u64,
}

impl OnChainFeed {
    pub fn new(
        client: Arc<dyn ChainClient>,
        tokens: Arc<TokenRegistry>,
        min_liquidity: Usd,
        max_head_lag_ms: u64,
    ) -> Self {
        Self {
            client,
            tokens,
            min_liquidity,
            max_head_lag_ms,
        }
    }

    /// Execute a Multicall3 batch, chunked to stay under the call limit
    async fn execute_multicall(&self, calls: Vec<IMulticall3::Call3>) -> ArbResult<Vec<IMulticall3::Result>> {
        let mut results = Vec::with_capacity(calls.len());
        for chunk in calls.chunks(MAX_CALLS_PER_BATCH) {
            let calldata = IMulticall3::aggregate3Call { calls: chunk.to_vec() }.abi_encode();
            let raw = self.client.call(MULTICALL3, calldata.into()).await?;
            let decoded = IMulticall3::aggregate3Call::abi_decode_returns(&raw)
                .map_err(|e| ArbError::Encoding(format!("multicall result: {}", e)))?;
            results.extend(decoded);
        }
        Ok(results)
    }

    fn pool_decimals(&self, pool: &Pool) -> Option<Vec<u8>> {
        pool.tokens.iter().map(|t| self.tokens.decimals(t)).collect()
    }

    /// Turn one pool's reading into directed quotes above the liquidity floor
    fn pool_quotes(
        &self,
        venue: &Venue,
        pool: &Pool,
        decimals: &[u8],
        returns: &[Bytes],
        observed_at: DateTime<Utc>,
        block: u64,
    ) -> ArbResult<Vec<Quote>> {
        let reading = venue.quote_strategy().decode(pool, decimals, returns)?;
        let mut quotes = Vec::new();

        for (&(i, j), &rate) in &reading.rates {
            let token_in = pool.tokens[i];
            let depth = normalize_amount(reading.reserves[i], decimals[i])
                .zip(self.tokens.usd_price(&token_in))
                .map(|(whole, price)| price.mul_ratio(whole))
                .unwrap_or(Usd::ZERO);

            if depth < self.min_liquidity {
                trace!("{} pool {:?}: depth {} under floor", venue.id, pool.address, depth);
                continue;
            }

            quotes.push(Quote {
                venue: venue.id.clone(),
                family: venue.family,
                pool: pool.address,
                token_in,
                token_out: pool.tokens[j],
                price_ratio: rate,
                fee: pool.fee,
                liquidity_usd: depth,
                observed_at,
                block,
            });
        }
        Ok(quotes)
    }
}

#[async_trait]
impl PriceFeed for OnChainFeed {
    async fn venue_quotes(&self, venue: &Venue) -> ArbResult<Vec<Quote>> {
        let head = self.client.head().await?;
        let now = Utc::now();
        let head_age_ms = (now.timestamp_millis() - head.timestamp as i64 * 1_000).max(0) as u64;
        if head_age_ms > self.max_head_lag_ms {
            return Err(ArbError::StaleData {
                what: format!("chain head {}", head.number),
                age_ms: head_age_ms,
                limit_ms: self.max_head_lag_ms,
            });
        }

        // Pools whose tokens we can't normalize are skipped up front
        let mut layout: Vec<(&Pool, Vec<u8>, usize, usize)> = Vec::new();
        let mut calls: Vec<IMulticall3::Call3> = Vec::new();
        for pool in &venue.pools {
            let Some(decimals) = self.pool_decimals(pool) else {
                debug!("{} pool {:?}: unknown token decimals, skipped", venue.id, pool.address);
                continue;
            };
            let reads = venue.quote_strategy().reads(pool, &decimals);
            let offset = calls.len();
            calls.extend(reads.into_iter().map(|data| IMulticall3::Call3 {
                target: pool.address,
                allowFailure: true,
                callData: data,
            }));
            layout.push((pool, decimals, offset, calls.len() - offset));
        }

        let results = self.execute_multicall(calls).await?;

        let mut quotes = Vec::new();
        for (pool, decimals, offset, count) in layout {
            let Some(slice) = results.get(offset..offset + count) else {
                continue;
            };
            if slice.iter().any(|r| !r.success) {
                debug!("{} pool {:?}: read reverted", venue.id, pool.address);
                continue;
            }
            let returns: Vec<Bytes> = slice.iter().map(|r| r.returnData.clone()).collect();
            match self.pool_quotes(venue, pool, &decimals, &returns, now, head.number) {
                Ok(mut q) => quotes.append(&mut q),
                Err(err) => debug!("{} pool {:?}: {}", venue.id, pool.address, err),
            }
        }

        Ok(quotes)
    }
}

// ============================================
// BOUNDED CONCURRENT COLLECTION
// ============================================

#[derive(Debug, Default)]
pub struct QuoteBatch {
    pub quotes: Vec<Arc<Quote>>,
    /// Venues that failed this tick, with the reason
    pub failures: Vec<(String, ArbError)>,
    pub elapsed: Duration,
}

impl QuoteBatch {
    /// Some venues are missing from this batch
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Fetch every venue concurrently, at most `concurrency` at a time, each
/// under its own `venue_timeout`
pub async fn collect_quotes(
    feed: Arc<dyn PriceFeed>,
    venues: &[Arc<Venue>],
    concurrency: usize,
    venue_timeout: Duration,
) -> ArbResult<QuoteBatch> {
    let start = Instant::now();

    let outcomes: Vec<(String, ArbResult<Vec<Quote>>)> = stream::iter(venues.iter().cloned())
        .map(|venue| {
            let feed = feed.clone();
            async move {
                let outcome = match tokio::time::timeout(venue_timeout, feed.venue_quotes(&venue)).await {
                    Ok(result) => result,
                    Err(_) => Err(ArbError::Timeout {
                        operation: format!("quotes from {}", venue.id),
                        elapsed: venue_timeout,
                    }),
                };
                (venue.id.clone(), outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut batch = QuoteBatch::default();
    for (venue, outcome) in outcomes {
        match outcome {
            Ok(quotes) => batch.quotes.extend(quotes.into_iter().map(Arc::new)),
            Err(err) if err.is_cross_cutting() => return Err(err),
            Err(err) => {
                warn!("Venue {} skipped this tick: {}", venue, err);
                batch.failures.push((venue, err));
            }
        }
    }
    batch.elapsed = start.elapsed();

    info!(
        "📡 Quotes: {} from {} venues in {:?}{}",
        batch.quotes.len(),
        venues.len() - batch.failures.len(),
        batch.elapsed,
        if batch.is_partial() { " (partial)" } else { "" }
    );

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::WAD;
    use crate::rpc::{BlockHead, InclusionStatus};
    use crate::tokens::Token;
    use alloy_primitives::{B256, U256};
    use std::collections::HashMap;

    fn venue(id: &str) -> Arc<Venue> {
        Arc::new(Venue {
            id: id.into(),
            chain_id: 1,
            family: ProtocolFamily::ConstantProduct,
            router: Address::ZERO,
            factory: None,
            fee: Bps(30),
            pools: vec![Pool {
                address: Address::repeat_byte(0x11),
                tokens: vec![Address::repeat_byte(0xa), Address::repeat_byte(0xb)],
                fee: Bps(30),
            }],
        })
    }

    struct ScriptedFeed {
        outcomes: HashMap<String, ArbResult<Vec<Quote>>>,
        delay: Duration,
    }

    #[async_trait]
    impl PriceFeed for ScriptedFeed {
        async fn venue_quotes(&self, venue: &Venue) -> ArbResult<Vec<Quote>> {
            tokio::time::sleep(self.delay).await;
            self.outcomes.get(&venue.id).cloned().unwrap_or(Ok(Vec::new()))
        }
    }

    fn quote(venue: &str) -> Quote {
        Quote::new_for_test(
            venue,
            Address::repeat_byte(0xa),
            Address::repeat_byte(0xb),
            Ratio::ONE,
            Bps(30),
            Usd::from_whole(1_000_000),
        )
    }

    #[tokio::test]
    async fn test_single_venue_failure_is_partial() {
        let mut outcomes = HashMap::new();
        outcomes.insert("good".to_string(), Ok(vec![quote("good")]));
        outcomes.insert("bad".to_string(), Err(ArbError::Unreachable("reset".into())));
        let feed = Arc::new(ScriptedFeed { outcomes, delay: Duration::ZERO });

        let batch = collect_quotes(feed, &[venue("good"), venue("bad")], 4, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(batch.quotes.len(), 1);
        assert!(batch.is_partial());
        assert_eq!(batch.failures[0].0, "bad");
    }

    #[tokio::test]
    async fn test_venue_timeout_is_reported() {
        let feed = Arc::new(ScriptedFeed { outcomes: HashMap::new(), delay: Duration::from_millis(200) });
        let batch = collect_quotes(feed, &[venue("slow")], 1, Duration::from_millis(10)).await.unwrap();
        assert!(matches!(batch.failures[0].1, ArbError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cross_cutting_failure_aborts() {
        let mut outcomes = HashMap::new();
        outcomes.insert(
            "down".to_string(),
            Err(ArbError::AllEndpointsDown { chain_id: 1, count: 2, last: "refused".into() }),
        );
        let feed = Arc::new(ScriptedFeed { outcomes, delay: Duration::ZERO });
        let result = collect_quotes(feed, &[venue("down")], 1, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ArbError::AllEndpointsDown { .. })));
    }

    #[test]
    fn test_staleness_age() {
        let mut q = quote("uni");
        q.observed_at = Utc::now() - chrono::Duration::milliseconds(5_000);
        assert!(q.is_stale(Utc::now(), 1_000));
        assert!(!q.is_stale(Utc::now(), 60_000));
    }

    // ---------- on-chain feed against a scripted chain ----------

    struct MulticallChain {
        reserves: (u128, u128),
        head_timestamp: u64,
    }

    fn word(value: U256) -> Vec<u8> {
        value.to_be_bytes::<32>().to_vec()
    }

    #[async_trait]
    impl ChainClient for MulticallChain {
        fn chain_id(&self) -> u64 {
            1
        }

        async fn head(&self) -> ArbResult<BlockHead> {
            Ok(BlockHead { number: 100, timestamp: self.head_timestamp, base_fee_wei: 1 })
        }

        async fn call(&self, to: Address, _data: Bytes) -> ArbResult<Bytes> {
            assert_eq!(to, MULTICALL3);
            let mut ret = word(U256::from(self.reserves.0));
            ret.extend(word(U256::from(self.reserves.1)));
            ret.extend(word(U256::ZERO));
            let results = vec![IMulticall3::Result { success: true, returnData: ret.into() }];
            Ok(IMulticall3::aggregate3Call::abi_encode_returns(&results).into())
        }

        async fn transaction_status(&self, _tx_hash: B256) -> ArbResult<InclusionStatus> {
            Ok(InclusionStatus::Pending)
        }

        async fn nonce(&self, _address: Address) -> ArbResult<u64> {
            Ok(0)
        }
    }

    fn registry() -> Arc<TokenRegistry> {
        Arc::new(TokenRegistry::new(
            vec![
                (
                    Token { symbol: "A".into(), address: Address::repeat_byte(0xa), decimals: 18, is_base: true },
                    Usd::from_whole(1),
                ),
                (
                    Token { symbol: "B".into(), address: Address::repeat_byte(0xb), decimals: 18, is_base: true },
                    Usd::from_whole(1),
                ),
            ],
            Address::repeat_byte(0xa),
            None,
        ))
    }

    #[tokio::test]
    async fn test_on_chain_feed_quotes_both_directions() {
        let chain = Arc::new(MulticallChain {
            reserves: (1_000_000 * WAD, 1_000_000 * WAD),
            head_timestamp: Utc::now().timestamp() as u64,
        });
        let feed = OnChainFeed::new(chain, registry(), Usd::from_whole(10_000), 30_000);

        let quotes = feed.venue_quotes(&venue("uni")).await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert!(quotes.iter().all(|q| q.price_ratio == Ratio::from_fraction(9_970, 10_000).unwrap()));
        assert!(quotes.iter().all(|q| q.liquidity_usd == Usd::from_whole(1_000_000)));

        let q = feed
            .get_quote(&venue("uni"), Address::repeat_byte(0xb), Address::repeat_byte(0xa))
            .await
            .unwrap();
        assert_eq!(q.block, 100);
    }

    #[tokio::test]
    async fn test_on_chain_feed_applies_liquidity_floor() {
        let chain = Arc::new(MulticallChain {
            reserves: (100 * WAD, 100 * WAD),
            head_timestamp: Utc::now().timestamp() as u64,
        });
        let feed = OnChainFeed::new(chain, registry(), Usd::from_whole(10_000), 30_000);
        assert!(feed.venue_quotes(&venue("uni")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lagging_head_is_stale() {
        let chain = Arc::new(MulticallChain {
            reserves: (1_000_000 * WAD, 1_000_000 * WAD),
            head_timestamp: Utc::now().timestamp() as u64 - 600,
        });
        let feed = OnChainFeed::new(chain, registry(), Usd::from_whole(10_000), 30_000);
        let err = feed.venue_quotes(&venue("uni")).await.unwrap_err();
        assert!(matches!(err, ArbError::StaleData { .. }));
    }
}
