// src/monitor/sources/stablecoins.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::monitor::types::DataSource;

const TOP_N: usize = 8;

#[derive(Debug, Default, Deserialize)]
struct Pegged {
    #[serde(rename = "peggedUSD")]
    pegged_usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChainRow {
    name: String,
    #[serde(default, rename = "totalCirculatingUSD")]
    total_circulating_usd: Option<Pegged>,
}

#[derive(Debug, Deserialize)]
struct ChainCirculating {
    current: Option<Pegged>,
}

#[derive(Debug, Deserialize)]
struct PeggedAsset {
    name: String,
    symbol: String,
    #[serde(default, rename = "chainCirculating")]
    chain_circulating: HashMap<String, ChainCirculating>,
}

#[derive(Debug, Deserialize)]
struct AssetsBody {
    #[serde(rename = "peggedAssets")]
    pegged_assets: Vec<PeggedAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableSupply {
    pub name: String,
    pub symbol: String,
    pub circulating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stablecoins {
    #[serde(rename = "totalUSD")]
    pub total_usd: f64,
    pub breakdown: Vec<StableSupply>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// Stablecoin float on one chain: chain total plus the largest assets.
pub struct StablecoinSource {
    http: reqwest::Client,
    chains_url: String,
    assets_url: String,
    chain: String,
}

impl StablecoinSource {
    pub fn new(
        http: reqwest::Client,
        chains_url: impl Into<String>,
        assets_url: impl Into<String>,
        chain: impl Into<String>,
    ) -> Self {
        Self {
            http,
            chains_url: chains_url.into(),
            assets_url: assets_url.into(),
            chain: chain.into(),
        }
    }

    async fn get_text(&self, url: &str, what: &str) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("DeFiLlama {what} get()"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("DeFiLlama {what}: {status}");
        }
        resp.text()
            .await
            .with_context(|| format!("DeFiLlama {what} .text()"))
    }

    fn build(chains: &str, assets: &str, chain: &str, now: DateTime<Utc>) -> Result<Stablecoins> {
        let rows: Vec<ChainRow> =
            serde_json::from_str(chains).context("parsing stablecoin chains json")?;
        let row = rows
            .into_iter()
            .find(|r| r.name == chain)
            .with_context(|| format!("{chain} not found in stablecoin chains data"))?;

        let body: AssetsBody = serde_json::from_str(assets).context("parsing stablecoins json")?;
        let mut breakdown: Vec<StableSupply> = body
            .pegged_assets
            .into_iter()
            .filter_map(|a| {
                let usd = a
                    .chain_circulating
                    .get(chain)?
                    .current
                    .as_ref()
                    .and_then(|c| c.pegged_usd)
                    .unwrap_or(0.0);
                (usd > 0.0).then(|| StableSupply {
                    name: a.name,
                    symbol: a.symbol,
                    circulating: usd,
                })
            })
            .collect();
        breakdown.sort_by(|a, b| b.circulating.total_cmp(&a.circulating));
        breakdown.truncate(TOP_N);

        Ok(Stablecoins {
            total_usd: row
                .total_circulating_usd
                .and_then(|p| p.pegged_usd)
                .unwrap_or(0.0),
            breakdown,
            source: "defillama-stablecoins".to_string(),
            fetched_at: now,
        })
    }
}

#[async_trait]
impl DataSource for StablecoinSource {
    fn name(&self) -> &'static str {
        "stablecoins"
    }

    async fn fetch(&self) -> Result<Value> {
        let (chains, assets) = tokio::try_join!(
            self.get_text(&self.chains_url, "stablecoin chains"),
            self.get_text(&self.assets_url, "stablecoins"),
        )?;
        let out = Self::build(&chains, &assets, &self.chain, Utc::now())?;
        Ok(serde_json::to_value(out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAINS: &str = r#"[
        {"name":"Ethereum","totalCirculatingUSD":{"peggedUSD":1.0e11}},
        {"name":"Base","totalCirculatingUSD":{"peggedUSD":4.2e9}}
    ]"#;

    const ASSETS: &str = r#"{"peggedAssets":[
        {"name":"Tether","symbol":"USDT","chainCirculating":{"Ethereum":{"current":{"peggedUSD":5.0e10}}}},
        {"name":"USD Coin","symbol":"USDC","chainCirculating":{"Base":{"current":{"peggedUSD":3.9e9}}}},
        {"name":"Dai","symbol":"DAI","chainCirculating":{"Base":{"current":{"peggedUSD":2.0e8}}}},
        {"name":"Ghost","symbol":"GST","chainCirculating":{"Base":{"current":{}}}}
    ]}"#;

    #[test]
    fn breakdown_is_chain_specific_and_sorted() {
        let out = StablecoinSource::build(CHAINS, ASSETS, "Base", Utc::now()).unwrap();
        assert_eq!(out.total_usd, 4.2e9);
        let symbols: Vec<_> = out.breakdown.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["USDC", "DAI"]);
    }

    #[test]
    fn unknown_chain_is_an_error() {
        let err = StablecoinSource::build(CHAINS, ASSETS, "Zora", Utc::now()).unwrap_err();
        assert!(err.to_string().contains("Zora not found"));
    }
}
