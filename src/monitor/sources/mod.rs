// src/monitor/sources/mod.rs
pub mod chain_stats;
pub mod defi_tvl;
pub mod ecosystem_feed;
pub mod stablecoins;

use crate::chain::RpcClient;
use crate::config::AppConfig;
use crate::monitor::types::DataSource;

pub use chain_stats::ChainStatsSource;
pub use defi_tvl::DefiTvlSource;
pub use ecosystem_feed::EcosystemFeedSource;
pub use stablecoins::StablecoinSource;

/// The production source set: three core market sources plus the ecosystem feed.
pub fn default_sources(
    cfg: &AppConfig,
    http: reqwest::Client,
    rpc: RpcClient,
) -> Vec<Box<dyn DataSource>> {
    let s = &cfg.sources;
    vec![
        Box::new(DefiTvlSource::new(
            http.clone(),
            &s.llama_protocols_url,
            &s.chain_name,
        )),
        Box::new(ChainStatsSource::new(rpc)),
        Box::new(StablecoinSource::new(
            http,
            &s.stablecoin_chains_url,
            &s.stablecoins_url,
            &s.chain_name,
        )),
        Box::new(EcosystemFeedSource::new(
            cfg.ecosystem_feed_path(),
            s.ecosystem_max_age_secs,
        )),
    ]
}
