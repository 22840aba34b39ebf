// src/monitor/sources/defi_tvl.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::monitor::types::DataSource;

const TOP_N: usize = 10;

#[derive(Debug, Deserialize)]
struct Protocol {
    name: String,
    #[serde(default)]
    chains: Vec<String>,
    #[serde(default, rename = "chainTvls")]
    chain_tvls: HashMap<String, Value>,
    category: Option<String>,
    change_1d: Option<f64>,
    change_7d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolTvl {
    pub name: String,
    pub tvl: f64,
    pub category: String,
    pub change_1d: Option<f64>,
    pub change_7d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefiTvl {
    pub total_tvl: f64,
    pub top_protocol_count: usize,
    pub protocols: Vec<ProtocolTvl>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// Top protocols by TVL on one chain, from DeFiLlama's `/protocols` listing.
pub struct DefiTvlSource {
    http: reqwest::Client,
    url: String,
    chain: String,
}

impl DefiTvlSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            chain: chain.into(),
        }
    }

    fn summarize(body: &str, chain: &str, now: DateTime<Utc>) -> Result<DefiTvl> {
        let raw: Vec<Protocol> = serde_json::from_str(body).context("parsing protocols json")?;

        let mut protocols: Vec<ProtocolTvl> = raw
            .into_iter()
            .filter(|p| p.chains.iter().any(|c| c == chain))
            .filter_map(|p| {
                let tvl = p.chain_tvls.get(chain).and_then(Value::as_f64)?;
                (tvl > 0.0).then(|| ProtocolTvl {
                    name: p.name,
                    tvl,
                    category: p.category.unwrap_or_else(|| "unknown".to_string()),
                    change_1d: p.change_1d,
                    change_7d: p.change_7d,
                })
            })
            .collect();
        protocols.sort_by(|a, b| b.tvl.total_cmp(&a.tvl));
        protocols.truncate(TOP_N);

        Ok(DefiTvl {
            total_tvl: protocols.iter().map(|p| p.tvl).sum(),
            top_protocol_count: protocols.len(),
            protocols,
            source: "defillama".to_string(),
            fetched_at: now,
        })
    }
}

#[async_trait]
impl DataSource for DefiTvlSource {
    fn name(&self) -> &'static str {
        "defi"
    }

    async fn fetch(&self) -> Result<Value> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("defillama protocols get()")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("DeFiLlama protocols API: {status}");
        }
        let body = resp.text().await.context("defillama protocols .text()")?;
        let tvl = Self::summarize(&body, &self.chain, Utc::now())?;
        Ok(serde_json::to_value(tvl)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_chain_protocols_sorted_by_tvl() {
        let body = r#"[
            {"name":"Aerodrome","chains":["Base"],"chainTvls":{"Base":500.0},"category":"Dexs","change_1d":1.2,"change_7d":null},
            {"name":"Aave","chains":["Ethereum","Base"],"chainTvls":{"Base":900.0,"Ethereum":9000.0},"category":"Lending"},
            {"name":"Lido","chains":["Ethereum"],"chainTvls":{"Ethereum":30000.0}},
            {"name":"Dust","chains":["Base"],"chainTvls":{"Base":0}},
            {"name":"NoCategory","chains":["Base"],"chainTvls":{"Base":10}}
        ]"#;
        let out = DefiTvlSource::summarize(body, "Base", Utc::now()).unwrap();
        let names: Vec<_> = out.protocols.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Aave", "Aerodrome", "NoCategory"]);
        assert_eq!(out.total_tvl, 1410.0);
        assert_eq!(out.top_protocol_count, 3);
        assert_eq!(out.protocols[2].category, "unknown");
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let out = DefiTvlSource::summarize("[]", "Base", Utc::now()).unwrap();
        let v = serde_json::to_value(out).unwrap();
        assert!(v.get("totalTvl").is_some());
        assert!(v.get("topProtocolCount").is_some());
    }
}
