//! Chain access with ordered endpoint failover.
//!
//! [`ChainClient`] is the seam every component reads the chain through.
//! [`HttpEndpoint`] wraps one alloy HTTP provider; [`RpcPool`] walks an
//! ordered list of endpoints, running each call under the shared
//! [`RetryPolicy`] and failing over to the next endpoint when one is spent.
//! When every endpoint fails the pool reports [`ArbError::AllEndpointsDown`].

use alloy_consensus::TxReceipt as _;
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{Address, Bytes, B256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::{ArbError, ArbResult};
use crate::retry::RetryPolicy;

// ============================================
// TYPES
// ============================================

/// Latest block as seen by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHead {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub base_fee_wei: u128,
}

/// Where a submitted transaction stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionStatus {
    Pending,
    Included { block: u64, gas_used: u64 },
    Reverted { block: u64, gas_used: u64 },
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn head(&self) -> ArbResult<BlockHead>;

    /// `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> ArbResult<Bytes>;

    async fn transaction_status(&self, tx_hash: B256) -> ArbResult<InclusionStatus>;

    async fn nonce(&self, address: Address) -> ArbResult<u64>;

    /// A chain is healthy when some endpoint can serve its head
    async fn health_check(&self) -> ArbResult<BlockHead> {
        self.head().await
    }
}

// ============================================
// SINGLE HTTP ENDPOINT
// ============================================

pub struct HttpEndpoint {
    url: String,
    chain_id: u64,
    provider: DynProvider,
}

impl HttpEndpoint {
    pub fn connect(url: &str, chain_id: u64) -> ArbResult<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ArbError::Config(format!("bad RPC url {}: {}", url, e)))?;
        let provider = ProviderBuilder::new().connect_http(parsed).erased();
        Ok(Self {
            url: url.to_string(),
            chain_id,
            provider,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChainClient for HttpEndpoint {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn head(&self) -> ArbResult<BlockHead> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(ArbError::unreachable)?
            .ok_or_else(|| ArbError::Unreachable(format!("{} returned no latest block", self.url)))?;

        Ok(BlockHead {
            number: block.header.number,
            timestamp: block.header.timestamp,
            base_fee_wei: block.header.base_fee_per_gas.unwrap_or_default() as u128,
        })
    }

    async fn call(&self, to: Address, data: Bytes) -> ArbResult<Bytes> {
        let tx = TransactionRequest::default().to(to).input(data.into());
        self.provider.call(tx).await.map_err(call_error)
    }

    async fn transaction_status(&self, tx_hash: B256) -> ArbResult<InclusionStatus> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(ArbError::unreachable)?;

        Ok(match receipt {
            None => InclusionStatus::Pending,
            Some(receipt) => {
                let block = receipt.block_number.unwrap_or_default();
                if receipt.status() {
                    InclusionStatus::Included { block, gas_used: receipt.gas_used }
                } else {
                    InclusionStatus::Reverted { block, gas_used: receipt.gas_used }
                }
            }
        })
    }

    async fn nonce(&self, address: Address) -> ArbResult<u64> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(ArbError::unreachable)
    }

    /// Head read plus a chain id check, so a misrouted URL counts as down
    async fn health_check(&self) -> ArbResult<BlockHead> {
        let reported = self.provider.get_chain_id().await.map_err(ArbError::unreachable)?;
        if reported != self.chain_id {
            return Err(ArbError::Unreachable(format!(
                "{} serves chain {}, expected {}",
                self.url, reported, self.chain_id
            )));
        }
        self.head().await
    }
}

/// A contract revert is an answer, not an outage: it is returned as-is
/// instead of being retried and failed over.
fn call_error(err: impl std::fmt::Display) -> ArbError {
    let message = err.to_string();
    if message.to_ascii_lowercase().contains("revert") {
        ArbError::SimulationRevert(message)
    } else {
        ArbError::Unreachable(message)
    }
}

// ============================================
// FAILOVER POOL
// ============================================

pub struct RpcPool {
    chain_id: u64,
    endpoints: Vec<Arc<dyn ChainClient>>,
    retry: RetryPolicy,
    /// Index of the last endpoint that answered
    preferred: AtomicUsize,
}

impl RpcPool {
    pub fn new(chain_id: u64, endpoints: Vec<Arc<dyn ChainClient>>, retry: RetryPolicy) -> Self {
        Self {
            chain_id,
            endpoints,
            retry,
            preferred: AtomicUsize::new(0),
        }
    }

    /// Connect to every configured URL, in order
    pub fn connect(chain_id: u64, urls: &[String], retry: RetryPolicy) -> ArbResult<Self> {
        let endpoints = urls
            .iter()
            .map(|url| HttpEndpoint::connect(url, chain_id).map(|e| Arc::new(e) as Arc<dyn ChainClient>))
            .collect::<ArbResult<Vec<_>>>()?;
        info!("🔌 Chain {}: {} RPC endpoint(s) configured", chain_id, endpoints.len());
        Ok(Self::new(chain_id, endpoints, retry))
    }

    /// Run `op` against endpoints starting from the preferred one. Retryable
    /// failures move on to the next endpoint once the retry budget is spent;
    /// other failures are returned untouched.
    async fn with_failover<T, F, Fut>(&self, operation: &str, op: F) -> ArbResult<T>
    where
        F: Fn(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = ArbResult<T>>,
    {
        let count = self.endpoints.len();
        let start = self.preferred.load(Ordering::Relaxed) % count.max(1);
        let mut last = String::from("no endpoints configured");

        for offset in 0..count {
            let index = (start + offset) % count;
            let endpoint = self.endpoints[index].clone();

            match self.retry.run(operation, || op(endpoint.clone())).await {
                Ok(value) => {
                    if index != start {
                        info!("🔀 Chain {}: failed over to endpoint #{}", self.chain_id, index);
                        self.preferred.store(index, Ordering::Relaxed);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    warn!("Chain {} endpoint #{} failed {}: {}", self.chain_id, index, operation, err);
                    last = err.to_string();
                }
                Err(err) => return Err(err),
            }
        }

        debug!("Chain {}: every endpoint failed {}", self.chain_id, operation);
        Err(ArbError::AllEndpointsDown {
            chain_id: self.chain_id,
            count,
            last,
        })
    }
}

#[async_trait]
impl ChainClient for RpcPool {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn head(&self) -> ArbResult<BlockHead> {
        self.with_failover("eth_getBlockByNumber", |e| async move { e.head().await })
            .await
    }

    async fn call(&self, to: Address, data: Bytes) -> ArbResult<Bytes> {
        self.with_failover("eth_call", |e| {
            let data = data.clone();
            async move { e.call(to, data).await }
        })
        .await
    }

    async fn transaction_status(&self, tx_hash: B256) -> ArbResult<InclusionStatus> {
        self.with_failover("eth_getTransactionReceipt", |e| async move {
            e.transaction_status(tx_hash).await
        })
        .await
    }

    async fn nonce(&self, address: Address) -> ArbResult<u64> {
        self.with_failover("eth_getTransactionCount", |e| async move { e.nonce(address).await })
            .await
    }

    async fn health_check(&self) -> ArbResult<BlockHead> {
        self.with_failover("health check", |e| async move { e.health_check().await })
            .await
    }
}

// ============================================
// TESTS
// ============================================
