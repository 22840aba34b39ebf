// src/config/mod.rs
pub mod app;

pub use app::{
    AppConfig, ChartConfig, ComposeConfig, ConfigError, InsightConfig, LedgerConfig,
    PublishConfig, SourcesConfig, XCredentials,
};
