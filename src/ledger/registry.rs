// src/ledger/registry.rs
//! Finding registry reached over JSON-RPC. Signing is left to the node:
//! the sender account must be unlocked there.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

use crate::chain::rpc::parse_quantity;
use crate::chain::RpcClient;
use crate::ledger::abi::{self, Token};
use crate::ledger::{FindingRegistry, LedgerError, RecordReceipt, RegistryEntry};

const UNKNOWN_ID: &str = "unknown";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<TxLog>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// Id carried by the first matching event: indexed in topic 1, or else the
/// first data word.
pub fn finding_id(logs: &[TxLog], contract: &str, topic: &str) -> String {
    let Some(log) = logs.iter().find(|l| {
        l.address.eq_ignore_ascii_case(contract)
            && l.topics.first().is_some_and(|t| t.eq_ignore_ascii_case(topic))
    }) else {
        return UNKNOWN_ID.to_string();
    };

    if let Some(t) = log.topics.get(1) {
        if let Ok(id) = parse_quantity(t) {
            return id.to_string();
        }
    }
    abi::decode_hex(&log.data)
        .ok()
        .and_then(|data| abi::Reader::new(&data).uint(0).ok())
        .map(|id| id.to_string())
        .unwrap_or_else(|| UNKNOWN_ID.to_string())
}

pub struct RpcRegistry {
    rpc: RpcClient,
    contract: String,
    from: String,
    event_topic: String,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl RpcRegistry {
    pub fn new(rpc: RpcClient, contract: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            rpc,
            contract: contract.into(),
            from: from.into(),
            event_topic: abi::NEW_FINDING_TOPIC.to_string(),
            confirm_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_event_topic(mut self, topic: impl Into<String>) -> Self {
        self.event_topic = topic.into();
        self
    }

    pub fn with_confirmation(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirm_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    async fn eth_call(&self, data: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
        let out: String = self
            .rpc
            .call(
                "eth_call",
                json!([{ "to": self.contract, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        Ok(abi::decode_hex(&out)?)
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, LedgerError> {
        let started = Instant::now();
        loop {
            let receipt: Option<TxReceipt> = self
                .rpc
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if let Some(r) = receipt {
                return Ok(r);
            }
            if started.elapsed() >= self.confirm_timeout {
                return Err(LedgerError::ConfirmationTimeout {
                    tx_hash: tx_hash.to_string(),
                    waited: started.elapsed(),
                });
            }
            tracing::debug!(target: "ledger", tx = tx_hash, "waiting for confirmation");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl FindingRegistry for RpcRegistry {
    fn address(&self) -> &str {
        &self.contract
    }

    async fn record_finding(
        &self,
        category: &str,
        summary: &str,
        content_hash: [u8; 32],
        reference: &str,
    ) -> Result<RecordReceipt, LedgerError> {
        let data = abi::encode_call(
            abi::RECORD_FINDING,
            &[
                Token::Str(category.to_string()),
                Token::Str(summary.to_string()),
                Token::Bytes32(content_hash),
                Token::Str(reference.to_string()),
            ],
        );
        let tx_hash: String = self
            .rpc
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": self.from,
                    "to": self.contract,
                    "data": format!("0x{}", hex::encode(data)),
                }]),
            )
            .await?;
        tracing::info!(target: "ledger", tx = %tx_hash, "transaction sent");

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        if receipt.status.as_deref() == Some("0x0") {
            return Err(LedgerError::Reverted { tx_hash });
        }
        let block_number = u64::try_from(parse_quantity(&receipt.block_number)?)
            .map_err(|_| LedgerError::Decode(format!("block number {}", receipt.block_number)))?;

        Ok(RecordReceipt {
            finding_id: finding_id(&receipt.logs, &self.contract, &self.event_topic),
            tx_hash: receipt.transaction_hash,
            block_number,
            contract_address: self.contract.clone(),
        })
    }

    async fn total_findings(&self) -> Result<u128, LedgerError> {
        let out = self
            .eth_call(abi::encode_call(abi::TOTAL_FINDINGS, &[]))
            .await?;
        Ok(abi::Reader::new(&out).uint(0)?)
    }

    async fn latest_findings(&self, n: u64) -> Result<Vec<RegistryEntry>, LedgerError> {
        let out = self
            .eth_call(abi::encode_call(
                abi::GET_LATEST_FINDINGS,
                &[Token::Uint(u128::from(n))],
            ))
            .await?;
        Ok(abi::decode_findings(&out)?
            .into_iter()
            .map(RegistryEntry::from)
            .collect())
    }
}
