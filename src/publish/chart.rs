// src/publish/chart.rs
//! Optional chart attachment. Selection is tiered by insight category and by
//! whatever data the snapshot actually holds; rendering is a plain bar chart.

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;

use crate::analyze::Category;
use crate::monitor::sources::chain_stats::ChainStats;
use crate::monitor::sources::defi_tvl::DefiTvl;
use crate::monitor::sources::stablecoins::Stablecoins;
use crate::monitor::Snapshot;

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 400;

const BACKGROUND: Rgb<u8> = Rgb([0x1a, 0x1a, 0x2e]);
const AXIS: Rgb<u8> = Rgb([0x55, 0x55, 0x6e]);
const TVL_COLOR: Rgb<u8> = Rgb([0x00, 0xd4, 0xff]);
const STABLE_COLOR: Rgb<u8> = Rgb([0x4a, 0xde, 0x80]);
const CHAIN_COLOR: Rgb<u8> = Rgb([0xf4, 0x72, 0xb6]);

const TOP_PROTOCOLS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub title: String,
    pub series_label: String,
    pub bars: Vec<(String, f64)>,
    pub color: Rgb<u8>,
}

/// Pick a chart for `category` from the snapshot, or `None` when nothing fits.
pub fn select_chart(category: Category, snapshot: &Snapshot) -> Option<ChartSpec> {
    let specific = match category {
        Category::Tvl | Category::Protocol => {
            protocol_tvl(snapshot, "Base DeFi: top protocols by TVL")
        }
        Category::Stablecoin => stablecoin_supply(snapshot),
        Category::Chain => chain_snapshot(snapshot),
        _ => None,
    };
    specific.or_else(|| protocol_tvl(snapshot, "Base DeFi: protocol TVL snapshot"))
}

fn payload<T: serde::de::DeserializeOwned>(snapshot: &Snapshot, source: &str) -> Option<T> {
    snapshot
        .payload(source)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn protocol_tvl(snapshot: &Snapshot, title: &str) -> Option<ChartSpec> {
    let defi: DefiTvl = payload(snapshot, "defi")?;
    let bars: Vec<(String, f64)> = defi
        .protocols
        .iter()
        .take(TOP_PROTOCOLS)
        .map(|p| (p.name.clone(), p.tvl / 1e6))
        .collect();
    (!bars.is_empty()).then(|| ChartSpec {
        title: title.to_string(),
        series_label: "TVL ($M)".into(),
        bars,
        color: TVL_COLOR,
    })
}

fn stablecoin_supply(snapshot: &Snapshot) -> Option<ChartSpec> {
    let stables: Stablecoins = payload(snapshot, "stablecoins")?;
    let mut bars: Vec<(String, f64)> = stables
        .breakdown
        .iter()
        .filter(|s| s.circulating > 0.0)
        .map(|s| (s.symbol.to_uppercase(), s.circulating / 1e6))
        .collect();
    bars.sort_by(|a, b| b.1.total_cmp(&a.1));
    (!bars.is_empty()).then(|| ChartSpec {
        title: "Base stablecoin supply".into(),
        series_label: "Supply ($M)".into(),
        bars,
        color: STABLE_COLOR,
    })
}

fn chain_snapshot(snapshot: &Snapshot) -> Option<ChartSpec> {
    let stats: ChainStats = payload(snapshot, "chain")?;
    let bars: Vec<(String, f64)> = [
        ("TX Count", stats.tx_count as f64),
        ("Gas (gwei)", stats.gas_price),
        ("Block #", stats.block_number as f64),
    ]
    .into_iter()
    .filter(|(_, v)| *v > 0.0)
    .map(|(l, v)| (l.to_string(), v))
    .collect();
    (bars.len() >= 2).then(|| ChartSpec {
        title: "Base L2: chain snapshot".into(),
        series_label: "Base chain stats".into(),
        bars,
        color: CHAIN_COLOR,
    })
}

pub trait ChartRenderer: Send + Sync {
    fn render(&self, spec: &ChartSpec, out: &Path) -> Result<()>;
}

/// Bars only, no text: labels and title travel in the post itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngChartRenderer;

impl PngChartRenderer {
    pub fn draw(spec: &ChartSpec) -> RgbImage {
        let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
        let (left, right, top, bottom) = (60u32, WIDTH - 20, 40u32, HEIGHT - 40);

        for x in left..=right {
            img.put_pixel(x, bottom, AXIS);
        }
        for y in top..=bottom {
            img.put_pixel(left, y, AXIS);
        }

        let values: Vec<f64> = spec
            .bars
            .iter()
            .map(|(_, v)| if v.is_finite() { v.max(0.0) } else { 0.0 })
            .collect();
        let max = values.iter().cloned().fold(0.0_f64, f64::max);
        if values.is_empty() || max <= 0.0 {
            return img;
        }

        let slot = ((right - left) / values.len() as u32).max(1);
        let bar_w = (slot * 7 / 10).max(1);
        let plot_h = (bottom - top) as f64;
        for (i, v) in values.iter().enumerate() {
            let h = ((v / max) * plot_h).round() as u32;
            let x0 = left + 1 + i as u32 * slot + (slot - bar_w) / 2;
            for x in x0..(x0 + bar_w).min(right) {
                for y in (bottom - h)..bottom {
                    img.put_pixel(x, y, spec.color);
                }
            }
        }
        img
    }
}

impl ChartRenderer for PngChartRenderer {
    fn render(&self, spec: &ChartSpec, out: &Path) -> Result<()> {
        if let Some(dir) = out.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        Self::draw(spec)
            .save_with_format(out, ImageFormat::Png)
            .with_context(|| format!("writing chart {}", out.display()))?;
        tracing::debug!(target: "publish", path = %out.display(), bars = spec.bars.len(), "chart rendered");
        Ok(())
    }
}
