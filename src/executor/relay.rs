//! Private Relay Client
//!
//! Bundles go to a Flashbots-style builder relay, never the public mempool:
//! - `eth_callBundle` simulates against the latest state before anything is sent
//! - `eth_sendBundle` targets one block; a missed block costs nothing
//!
//! Every request carries an `X-Flashbots-Signature` header from the relay key.

use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::signer::TransactionSigner;
use crate::errors::{ArbError, ArbResult};
use crate::retry::RetryPolicy;

pub const FLASHBOTS_MAINNET: &str = "https://relay.flashbots.net";

/// Signed transactions targeting one block
#[derive(Debug, Clone)]
pub struct Bundle {
    pub transactions: Vec<Bytes>,
    pub block_number: u64,
    pub min_timestamp: Option<u64>,
    pub max_timestamp: Option<u64>,
    /// Empty: any revert drops the whole bundle
    pub reverting_tx_hashes: Vec<B256>,
}

impl Bundle {
    pub fn single(tx: Bytes, block_number: u64) -> Self {
        Self {
            transactions: vec![tx],
            block_number,
            min_timestamp: None,
            max_timestamp: None,
            reverting_tx_hashes: vec![],
        }
    }
}

/// Relay-side dry run of a bundle
#[derive(Debug, Clone, Default)]
pub struct RelaySimulation {
    pub success: bool,
    pub state_block: Option<u64>,
    pub gas_used: Option<u64>,
    pub coinbase_diff: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait BundleRelay: Send + Sync {
    /// Simulate without broadcasting. A transaction revert is `Ok` with
    /// `success == false`; a relay-level error is `Err`.
    async fn simulate(&self, bundle: &Bundle) -> ArbResult<RelaySimulation>;

    /// Submit for the bundle's target block, returning the bundle hash
    async fn send_bundle(&self, bundle: &Bundle) -> ArbResult<String>;
}

pub struct FlashbotsRelay {
    http_client: Client,
    relay_url: String,
    signer: Arc<dyn TransactionSigner>,
    retry: RetryPolicy,
}

impl FlashbotsRelay {
    pub fn new(relay_url: &str, signer: Arc<dyn TransactionSigner>, retry: RetryPolicy) -> Self {
        Self {
            http_client: Client::new(),
            relay_url: relay_url.to_string(),
            signer,
            retry,
        }
    }

    /// POST one signed JSON-RPC request and return the response body
    async fn post(&self, request: &Value) -> ArbResult<Value> {
        let body = serde_json::to_string(request)?;
        let signature = self.signer.sign_relay_request(&body).await?;

        debug!("→ {} {}", self.relay_url, request["method"]);

        let response = self
            .http_client
            .post(&self.relay_url)
            .header("Content-Type", "application/json")
            .header("X-Flashbots-Signature", signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let value: Value = response.json().await?;
        debug!("← relay status {}", status);

        if status.is_server_error() {
            return Err(ArbError::Unreachable(format!("relay returned {}", status)));
        }
        Ok(value)
    }
}

#[async_trait]
impl BundleRelay for FlashbotsRelay {
    async fn simulate(&self, bundle: &Bundle) -> ArbResult<RelaySimulation> {
        let request = call_bundle_request(bundle);
        let response = self.retry.run("relay simulate", || self.post(&request)).await?;
        parse_simulation(&response)
    }

    async fn send_bundle(&self, bundle: &Bundle) -> ArbResult<String> {
        let request = send_bundle_request(bundle);
        let response = self.retry.run("relay send", || self.post(&request)).await?;
        parse_bundle_hash(&response)
    }
}

// ============================================
// REQUEST / RESPONSE SHAPES
// ============================================

fn hex_txs(bundle: &Bundle) -> Vec<String> {
    bundle.transactions.iter().map(|tx| format!("0x{}", hex::encode(tx))).collect()
}

pub fn send_bundle_request(bundle: &Bundle) -> Value {
    let mut params = json!({
        "txs": hex_txs(bundle),
        "blockNumber": format!("0x{:x}", bundle.block_number),
    });
    if let Some(min_ts) = bundle.min_timestamp {
        params["minTimestamp"] = json!(min_ts);
    }
    if let Some(max_ts) = bundle.max_timestamp {
        params["maxTimestamp"] = json!(max_ts);
    }
    if !bundle.reverting_tx_hashes.is_empty() {
        let hashes: Vec<String> = bundle.reverting_tx_hashes.iter().map(|h| format!("{:?}", h)).collect();
        params["revertingTxHashes"] = json!(hashes);
    }

    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_sendBundle",
        "params": [params]
    })
}

pub fn call_bundle_request(bundle: &Bundle) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_callBundle",
        "params": [{
            "txs": hex_txs(bundle),
            "blockNumber": format!("0x{:x}", bundle.block_number),
            "stateBlockNumber": "latest"
        }]
    })
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
        .unwrap_or_else(|| error.to_string())
}

/// Only a per-transaction error is a revert. A top-level JSON-RPC error
/// (rate limit, bad signature, stale block) says nothing about the venues.
pub fn parse_simulation(response: &Value) -> ArbResult<RelaySimulation> {
    if let Some(error) = response.get("error") {
        return Err(ArbError::RelayRejected(error_message(error)));
    }

    let result = response.get("result");

    // A bundle fails if any transaction in it reverted
    if let Some(results) = result.and_then(|r| r.get("results")).and_then(|r| r.as_array()) {
        for tx_result in results {
            if let Some(error) = tx_result.get("error") {
                let reason = tx_result
                    .get("revert")
                    .and_then(|r| r.as_str())
                    .map(|r| format!("{}: {}", error.as_str().unwrap_or("reverted"), r))
                    .unwrap_or_else(|| error.as_str().unwrap_or("transaction error").to_string());
                return Ok(RelaySimulation {
                    success: false,
                    error: Some(reason),
                    ..Default::default()
                });
            }
        }
    }

    Ok(RelaySimulation {
        success: true,
        state_block: result
            .and_then(|r| r.get("stateBlockNumber"))
            .and_then(|s| s.as_u64().or_else(|| s.as_str().and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()))),
        gas_used: result.and_then(|r| r.get("totalGasUsed")).and_then(|g| g.as_u64()),
        coinbase_diff: result.and_then(|r| r.get("coinbaseDiff")).and_then(|c| c.as_str()).map(String::from),
        error: None,
    })
}

pub fn parse_bundle_hash(response: &Value) -> ArbResult<String> {
    if let Some(error) = response.get("error") {
        return Err(ArbError::RelayRejected(error_message(error)));
    }
    response
        .get("result")
        .and_then(|r| r.get("bundleHash"))
        .and_then(|h| h.as_str())
        .map(String::from)
        .ok_or_else(|| ArbError::RelayRejected(format!("no bundle hash in {}", response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> Bundle {
        Bundle::single(Bytes::from(vec![0x02, 0xab]), 19_000_000)
    }

    #[test]
    fn test_send_request_shape() {
        let request = send_bundle_request(&bundle());
        assert_eq!(request["method"], "eth_sendBundle");
        assert_eq!(request["params"][0]["txs"][0], "0x02ab");
        assert_eq!(request["params"][0]["blockNumber"], "0x121eac0");
        assert!(request["params"][0].get("revertingTxHashes").is_none());

        let call = call_bundle_request(&bundle());
        assert_eq!(call["method"], "eth_callBundle");
        assert_eq!(call["params"][0]["stateBlockNumber"], "latest");
    }

    #[test]
    fn test_simulation_parsing() {
        let ok = json!({
            "result": {
                "results": [{ "gasUsed": 180000 }],
                "totalGasUsed": 180000,
                "coinbaseDiff": "1000",
                "stateBlockNumber": 18999999
            }
        });
        let sim = parse_simulation(&ok).unwrap();
        assert!(sim.success);
        assert_eq!(sim.gas_used, Some(180_000));
        assert_eq!(sim.state_block, Some(18_999_999));

        let reverted = json!({
            "result": { "results": [{ "error": "execution reverted", "revert": "TOO_LITTLE_RECEIVED" }] }
        });
        let sim = parse_simulation(&reverted).unwrap();
        assert!(!sim.success);
        assert_eq!(sim.error.as_deref(), Some("execution reverted: TOO_LITTLE_RECEIVED"));

    }

    #[test]
    fn test_relay_error_is_not_a_revert() {
        let rejected = json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32000, "message": "bundle too old" } });
        assert!(matches!(parse_simulation(&rejected), Err(ArbError::RelayRejected(m)) if m == "bundle too old"));

        let rate_limited = json!({ "error": { "code": 429, "message": "rate limit exceeded" } });
        let err = parse_simulation(&rate_limited).unwrap_err();
        assert_eq!(err.kind(), crate::errors::FailureKind::RelayRejected);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_bundle_hash_parsing() {
        let ok = json!({ "result": { "bundleHash": "0xabc" } });
        assert_eq!(parse_bundle_hash(&ok).unwrap(), "0xabc");

        let rejected = json!({ "error": { "code": -32602, "message": "invalid bundle" } });
        assert!(matches!(parse_bundle_hash(&rejected), Err(ArbError::RelayRejected(m)) if m == "invalid bundle"));
    }
}
