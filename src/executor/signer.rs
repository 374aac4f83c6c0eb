//! Wallet Signer
//!
//! Two keys, kept apart:
//! - the operator key signs the flash-loan transaction and pays gas
//! - the relay key only signs relay requests (`X-Flashbots-Signature`) and
//!   builds searcher reputation; it never holds funds
//!
//! ⚠️  Keys come from the environment and are never logged.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{keccak256, Address, Bytes, TxKind, B256, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::planner::ExecutionPlan;
use crate::errors::{ArbError, ArbResult};

pub const OPERATOR_KEY_VAR: &str = "OPERATOR_PRIVATE_KEY";
pub const RELAY_KEY_VAR: &str = "RELAY_SIGNER_KEY";

/// A signed, 2718-encoded transaction ready for a bundle
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: B256,
    pub nonce: u64,
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Account that sends the transaction and pays for gas
    fn address(&self) -> Address;

    /// Sign the plan's flash-loan call as an EIP-1559 transaction
    async fn sign_plan(
        &self,
        plan: &ExecutionPlan,
        nonce: u64,
        max_fee_per_gas: u128,
        priority_fee_wei: u128,
    ) -> ArbResult<SignedTx>;

    /// `address:0xsignature` header value for a relay request body
    async fn sign_relay_request(&self, body: &str) -> ArbResult<String>;
}

pub struct WalletManager {
    operator: PrivateKeySigner,
    relay: PrivateKeySigner,
    chain_id: u64,
}

impl WalletManager {
    /// Load both keys from the environment. A missing relay key falls back to
    /// a throwaway one; a missing operator key is an error.
    pub fn from_env(chain_id: u64) -> Result<Self> {
        let operator_key = std::env::var(OPERATOR_KEY_VAR)
            .map_err(|_| eyre!("{} is required to sign transactions", OPERATOR_KEY_VAR))?;

        let relay_key = std::env::var(RELAY_KEY_VAR).ok();
        if relay_key.is_none() {
            warn!("{} not set, signing relay requests with an ephemeral key", RELAY_KEY_VAR);
        }

        Self::new(&operator_key, relay_key.as_deref(), chain_id)
    }

    pub fn new(operator_key: &str, relay_key: Option<&str>, chain_id: u64) -> Result<Self> {
        let operator = parse_key(operator_key)?;
        let relay = match relay_key {
            Some(key) => parse_key(key)?,
            None => PrivateKeySigner::random(),
        };

        info!("✓ Operator wallet loaded: {:?}", operator.address());
        info!("✓ Relay signer loaded: {:?}", relay.address());

        Ok(Self { operator, relay, chain_id })
    }

    pub fn relay_address(&self) -> Address {
        self.relay.address()
    }
}

fn parse_key(key: &str) -> Result<PrivateKeySigner> {
    PrivateKeySigner::from_str(key.trim().trim_start_matches("0x")).map_err(|e| eyre!("invalid private key: {}", e))
}

#[async_trait]
impl TransactionSigner for WalletManager {
    fn address(&self) -> Address {
        self.operator.address()
    }

    async fn sign_plan(
        &self,
        plan: &ExecutionPlan,
        nonce: u64,
        max_fee_per_gas: u128,
        priority_fee_wei: u128,
    ) -> ArbResult<SignedTx> {
        let tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            gas_limit: plan.gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: priority_fee_wei,
            to: TxKind::Call(plan.to),
            value: U256::ZERO,
            input: plan.calldata.clone(),
            access_list: Default::default(),
        };

        let signature = self
            .operator
            .sign_hash(&tx.signature_hash())
            .await
            .map_err(|e| ArbError::Encoding(format!("failed to sign transaction: {}", e)))?;

        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let raw = TxEnvelope::Eip1559(signed).encoded_2718();

        debug!(
            "Signed plan #{}: nonce {}, gas limit {}, max fee {}, tip {}, hash {:?}",
            plan.opportunity_id, nonce, plan.gas_limit, max_fee_per_gas, priority_fee_wei, hash
        );

        Ok(SignedTx { raw: Bytes::from(raw), hash, nonce })
    }

    async fn sign_relay_request(&self, body: &str) -> ArbResult<String> {
        // The relay expects an EIP-191 signature over the hex body hash
        let digest = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
        let signature = self
            .relay
            .sign_message(digest.as_bytes())
            .await
            .map_err(|e| ArbError::Encoding(format!("failed to sign relay request: {}", e)))?;

        Ok(format!("{:?}:0x{}", self.relay.address(), hex::encode(signature.as_bytes())))
    }
}
