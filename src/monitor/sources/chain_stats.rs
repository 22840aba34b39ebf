// src/monitor/sources/chain_stats.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chain::{parse_quantity, RpcClient};
use crate::monitor::types::DataSource;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<Value>,
    base_fee_per_gas: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStats {
    pub block_number: u64,
    pub timestamp: u64,
    pub block_time: Option<DateTime<Utc>>,
    pub tx_count: usize,
    pub gas_price: f64,
    pub base_fee_per_gas: Option<f64>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

fn wei_to_gwei(wei: u128) -> f64 {
    wei as f64 / 1e9
}

/// Latest block and gas price straight from the chain's JSON-RPC endpoint.
pub struct ChainStatsSource {
    rpc: RpcClient,
}

impl ChainStatsSource {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    fn build(block: RpcBlock, gas_price_hex: &str, now: DateTime<Utc>) -> Result<ChainStats> {
        let block_number = u64::try_from(parse_quantity(&block.number)?)?;
        let timestamp = u64::try_from(parse_quantity(&block.timestamp)?)?;
        let base_fee = match block.base_fee_per_gas.as_deref() {
            Some(h) => Some(wei_to_gwei(parse_quantity(h)?)),
            None => None,
        };
        Ok(ChainStats {
            block_number,
            timestamp,
            block_time: i64::try_from(timestamp)
                .ok()
                .and_then(|t| DateTime::from_timestamp(t, 0)),
            tx_count: block.transactions.len(),
            gas_price: wei_to_gwei(parse_quantity(gas_price_hex)?),
            base_fee_per_gas: base_fee,
            source: "base-rpc".to_string(),
            fetched_at: now,
        })
    }
}

#[async_trait]
impl DataSource for ChainStatsSource {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn fetch(&self) -> Result<Value> {
        let (block, gas) = tokio::join!(
            self.rpc
                .call::<Option<RpcBlock>>("eth_getBlockByNumber", json!(["latest", false])),
            self.rpc.call::<String>("eth_gasPrice", json!([])),
        );
        let block = block
            .context("eth_getBlockByNumber")?
            .context("node returned no latest block")?;
        let gas = gas.context("eth_gasPrice")?;
        let stats = Self::build(block, &gas, Utc::now())?;
        Ok(serde_json::to_value(stats)?)
    }
}
