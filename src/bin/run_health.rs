//! Print the run-log health summary. `--json` emits it as one JSON object.

use onchain_analyst::config::AppConfig;
use onchain_analyst::run_log::RunLog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    onchain_analyst::telemetry::init();
    let json = std::env::args().skip(1).any(|a| a == "--json");

    let cfg = AppConfig::resolve()?;
    let log = RunLog::new(cfg.run_log_path());
    let health = log.health().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        println!("run log: {}", log.path().display());
        print!("{health}");
    }
    Ok(())
}
