// tests/pipeline_cycle.rs
// End-to-end cycles against fake sources, backend and registry; the primary
// publish channel is the real X API client pointed at a mock server.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use onchain_analyst::analyze::{InsightEngine, InsightError, PromptPolicy, ReasoningBackend};
use onchain_analyst::config::{ComposeConfig, PublishConfig, XCredentials};
use onchain_analyst::ledger::{
    FindingRegistry, LedgerError, LedgerRecorder, RecordReceipt, RegistryEntry,
};
use onchain_analyst::monitor::{DataSource, SnapshotCollector, SnapshotStore, SourceKind};
use onchain_analyst::publish::{
    ChartRenderer, ChartSpec, Composer, DeferredQueue, DeliveryMethod, PublishStrategy, Publisher,
    XApiPublisher,
};
use onchain_analyst::run_log::RunLog;
use onchain_analyst::{Pipeline, RunStatus};

struct Source {
    name: &'static str,
    kind: SourceKind,
    ok: bool,
}

#[async_trait]
impl DataSource for Source {
    fn name(&self) -> &'static str {
        self.name
    }
    fn kind(&self) -> SourceKind {
        self.kind
    }
    async fn fetch(&self) -> anyhow::Result<Value> {
        if !self.ok {
            anyhow::bail!("{} unreachable", self.name)
        }
        if self.name == "defi" {
            return Ok(json!({
                "totalTvl": 2.0e9, "topProtocolCount": 1,
                "protocols": [
                    { "name": "Aerodrome", "tvl": 1.5e9, "category": "Dexes", "change_1d": 0.5, "change_7d": 2.0 }
                ],
                "source": "defillama", "fetchedAt": "2026-01-01T00:00:00Z"
            }));
        }
        Ok(json!({ "source": self.name, "value": 1 }))
    }
}

fn sources(core_ok: bool) -> Vec<Box<dyn DataSource>> {
    let core = |name| -> Box<dyn DataSource> {
        Box::new(Source {
            name,
            kind: SourceKind::Core,
            ok: core_ok,
        })
    };
    vec![
        core("defi"),
        core("chain"),
        core("stablecoins"),
        Box::new(Source {
            name: "ecosystem",
            kind: SourceKind::Auxiliary,
            ok: true,
        }),
    ]
}

/// Replies in order; the last reply repeats.
struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    users: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            users: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, InsightError> {
        self.users.lock().unwrap().push(user.to_string());
        let mut q = self.replies.lock().unwrap();
        let reply = if q.len() > 1 {
            q.pop_front().unwrap()
        } else {
            q.front().cloned().unwrap()
        };
        Ok(reply)
    }
    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn insight_reply(confidence: u8) -> String {
    format!(
        r#"```json
{{"category":"stablecoin","summary":"USDC float on Base up 4%","fullAnalysis":"USDC supply on Base grew 4% week over week.","tweetDraft":"USDC on Base is a GAME CHANGER 🚀 supply up 4% this week","confidence":{confidence}}}
```"#
    )
}

#[derive(Default)]
struct FakeRegistry {
    calls: AtomicUsize,
    references: Mutex<Vec<String>>,
    revert: bool,
}

#[async_trait]
impl FindingRegistry for FakeRegistry {
    fn address(&self) -> &str {
        "0x00000000000000000000000000000000000000aa"
    }
    async fn record_finding(
        &self,
        _category: &str,
        _summary: &str,
        _content_hash: [u8; 32],
        reference: &str,
    ) -> Result<RecordReceipt, LedgerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.references.lock().unwrap().push(reference.to_string());
        if self.revert {
            return Err(LedgerError::Reverted {
                tx_hash: "0xbad".into(),
            });
        }
        Ok(RecordReceipt {
            tx_hash: format!("0x{n:064x}"),
            block_number: 100 + n as u64,
            finding_id: n.to_string(),
            contract_address: self.address().into(),
        })
    }
    async fn total_findings(&self) -> Result<u128, LedgerError> {
        Ok(self.calls.load(Ordering::SeqCst) as u128)
    }
    async fn latest_findings(&self, _n: u64) -> Result<Vec<RegistryEntry>, LedgerError> {
        Ok(Vec::new())
    }
}

fn x_api(server: &MockServer) -> XApiPublisher {
    XApiPublisher::new(&PublishConfig {
        post_url: format!("{}/2/tweets", server.uri()),
        upload_url: format!("{}/1.1/media/upload.json", server.uri()),
        credentials: Some(XCredentials {
            api_key: "ck".into(),
            api_key_secret: "cs".into(),
            access_token: "at".into(),
            access_token_secret: "ats".into(),
        }),
        ..PublishConfig::default()
    })
    .with_timeout(Duration::from_millis(200))
}

fn pipeline(
    dir: &Path,
    core_ok: bool,
    backend: Arc<ScriptedBackend>,
    channels: Vec<Box<dyn Publisher>>,
    registry: Arc<FakeRegistry>,
) -> Pipeline {
    Pipeline::new(
        SnapshotCollector::new(sources(core_ok), SnapshotStore::new(dir.join("last-snapshot.json"))),
        InsightEngine::new(backend, PromptPolicy::default(), 7.0),
        Composer::new(&ComposeConfig::default()),
        PublishStrategy::new(channels).clearing_pending(DeferredQueue::new(dir)),
        LedgerRecorder::new(registry, 200),
        RunLog::new(dir.join("runs.jsonl")),
    )
}

#[tokio::test]
async fn all_core_sources_failing_ends_in_error_with_no_downstream_steps() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![insight_reply(9)]);
    let registry = Arc::new(FakeRegistry::default());
    let p = pipeline(tmp.path(), false, backend.clone(), vec![], registry.clone());

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Error);
    assert!(run.error.as_deref().unwrap().contains("all core data sources failed"));
    assert_eq!(run.steps.names(), vec!["monitor"]);
    assert!(!run.steps.monitor.as_ref().unwrap().success);
    assert!(backend.users.lock().unwrap().is_empty());
    assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    assert!(!tmp.path().join("last-snapshot.json").exists());

    let logged = p.run_log().read_all().await.unwrap();
    assert_eq!(logged, vec![run]);
}

#[tokio::test]
async fn low_confidence_is_skipped_with_threshold_reason() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = DeferredQueue::new(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let p = pipeline(
        tmp.path(),
        true,
        ScriptedBackend::new(vec![insight_reply(6)]),
        vec![Box::new(queue.clone())],
        registry.clone(),
    );

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Skipped);
    let reason = run.reason.as_deref().unwrap();
    assert!(reason.contains("threshold 7"), "{reason}");
    assert_eq!(run.steps.names(), vec!["monitor"]);
    assert!(run.insight.is_none());
    assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    assert!(!queue.text_path().exists());
}

#[tokio::test]
async fn primary_timeout_defers_text_and_cycle_still_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "data": { "id": "1" } }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let queue = DeferredQueue::new(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let p = pipeline(
        tmp.path(),
        true,
        ScriptedBackend::new(vec![insight_reply(8)]),
        vec![Box::new(x_api(&server)), Box::new(queue.clone())],
        registry.clone(),
    );

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Success);

    let published = run.steps.publish.as_ref().unwrap();
    assert!(!published.success);
    assert_eq!(published.method, Some(DeliveryMethod::Deferred));
    assert_eq!(published.error.as_ref().unwrap().kind, "timeout");

    let text = std::fs::read_to_string(queue.text_path()).unwrap();
    assert_eq!(published.retained_text.as_deref(), Some(text.as_str()));
    assert_eq!(text, "usdc on base is a supply up 4% this week");

    assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    assert_eq!(registry.references.lock().unwrap()[0], "");
    let insight = run.insight.as_ref().unwrap();
    assert_eq!(insight.finding_id, "1");
    assert_eq!(insight.publish_method, Some(DeliveryMethod::Deferred));
    assert!(insight.tweet_url.is_none());
}

#[tokio::test]
async fn blocked_publish_without_fallback_still_records() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string(r#"{"errors":[{"code":226}]}"#))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(FakeRegistry::default());
    let p = pipeline(
        tmp.path(),
        true,
        ScriptedBackend::new(vec![insight_reply(9)]),
        vec![Box::new(x_api(&server))],
        registry.clone(),
    );

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    let published = run.steps.publish.as_ref().unwrap();
    assert!(!published.success);
    assert_eq!(published.method, None);
    assert_eq!(published.error.as_ref().unwrap().kind, "blocked");
    assert!(published.retained_text.is_some());
    assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn live_post_url_is_anchored_and_pending_cleared() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "1811" } })))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let queue = DeferredQueue::new(tmp.path());
    std::fs::write(queue.text_path(), "stale").unwrap();
    let registry = Arc::new(FakeRegistry::default());
    let p = pipeline(
        tmp.path(),
        true,
        ScriptedBackend::new(vec![insight_reply(9)]),
        vec![Box::new(x_api(&server)), Box::new(queue.clone())],
        registry.clone(),
    );

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.steps.publish.as_ref().unwrap().success);
    assert_eq!(
        registry.references.lock().unwrap()[0],
        "https://x.com/i/status/1811"
    );
    assert!(!queue.text_path().exists());
}

#[tokio::test]
async fn ledger_failure_is_error_and_keeps_completed_steps() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(FakeRegistry {
        revert: true,
        ..FakeRegistry::default()
    });
    let p = pipeline(
        tmp.path(),
        true,
        ScriptedBackend::new(vec![insight_reply(9)]),
        vec![Box::new(DeferredQueue::new(tmp.path()))],
        registry,
    );

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Error);
    assert!(run.error.as_deref().unwrap().contains("reverted"));
    assert_eq!(
        run.steps.names(),
        vec!["monitor", "analyze", "compose", "publish", "onchain"]
    );
    assert!(!run.steps.onchain.as_ref().unwrap().success);
    assert!(run.insight.is_none());
}

#[tokio::test]
async fn malformed_insight_is_error() {
    let tmp = tempfile::tempdir().unwrap();
    let p = pipeline(
        tmp.path(),
        true,
        ScriptedBackend::new(vec![r#"{"category":"tvl","summary":"s"}"#.to_string()]),
        vec![],
        Arc::new(FakeRegistry::default()),
    );

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Error);
    assert!(run.error.as_deref().unwrap().contains("malformed insight"));
    assert_eq!(run.steps.names(), vec!["monitor", "analyze"]);
}

#[tokio::test]
async fn each_cycle_appends_exactly_one_record_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![
        insight_reply(9),
        insight_reply(3),
        "not json".to_string(),
        insight_reply(8),
    ]);
    let p = pipeline(
        tmp.path(),
        true,
        backend.clone(),
        vec![Box::new(DeferredQueue::new(tmp.path()))],
        Arc::new(FakeRegistry::default()),
    );

    let mut runs = Vec::new();
    for _ in 0..4 {
        runs.push(p.run_cycle().await.unwrap());
    }

    let logged = p.run_log().read_all().await.unwrap();
    assert_eq!(logged.len(), 4);
    assert_eq!(logged, runs);
    let statuses: Vec<_> = logged.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            RunStatus::Success,
            RunStatus::Skipped,
            RunStatus::Error,
            RunStatus::Success
        ]
    );
    assert!(logged.windows(2).all(|w| w[0].started_at <= w[1].started_at));

    // First cycle had no history; later ones compare against the stored snapshot.
    let users = backend.users.lock().unwrap();
    assert!(users[0].contains("first run"));
    assert!(users[1].contains("Previous snapshot"));

    let health = p.run_log().health().await.unwrap();
    assert_eq!((health.success, health.skipped, health.error), (2, 1, 1));
    assert_eq!(health.deferred, 2);
    assert_eq!(health.recorded, 2);
}

struct BrokenChart;

impl ChartRenderer for BrokenChart {
    fn render(&self, _spec: &ChartSpec, _out: &Path) -> anyhow::Result<()> {
        anyhow::bail!("png encoder unavailable")
    }
}

struct StubChart;

impl ChartRenderer for StubChart {
    fn render(&self, spec: &ChartSpec, out: &Path) -> anyhow::Result<()> {
        assert!(!spec.bars.is_empty());
        std::fs::write(out, b"\x89PNG")?;
        Ok(())
    }
}

#[tokio::test]
async fn chart_failure_does_not_stop_publish_or_record() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = DeferredQueue::new(tmp.path());
    let registry = Arc::new(FakeRegistry::default());
    let p = pipeline(
        tmp.path(),
        true,
        ScriptedBackend::new(vec![insight_reply(9)]),
        vec![Box::new(queue.clone())],
        registry.clone(),
    )
    .with_chart(Box::new(BrokenChart), tmp.path().join("post-chart.png"));

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    let chart = run.steps.chart.as_ref().unwrap();
    assert!(!chart.success);
    assert!(chart.path.is_none());
    assert!(chart.error.as_deref().unwrap().contains("png encoder unavailable"));
    assert!(run.steps.publish.is_some());
    assert_eq!(registry.calls.load(Ordering::SeqCst), 1);

    let pending = queue.load().await.unwrap();
    assert!(pending.media_path.is_none());
}

#[tokio::test]
async fn rendered_chart_is_handed_to_the_publisher() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = DeferredQueue::new(tmp.path());
    let chart_path = tmp.path().join("post-chart.png");
    let p = pipeline(
        tmp.path(),
        true,
        ScriptedBackend::new(vec![insight_reply(9)]),
        vec![Box::new(queue.clone())],
        Arc::new(FakeRegistry::default()),
    )
    .with_chart(Box::new(StubChart), chart_path.clone());

    let run = p.run_cycle().await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(
        run.steps.names(),
        vec!["monitor", "analyze", "compose", "chart", "publish", "onchain"]
    );
    let chart = run.steps.chart.as_ref().unwrap();
    assert!(chart.success);
    assert_eq!(chart.path.as_deref(), Some(chart_path.as_path()));
    assert!(chart_path.exists());

    let pending = queue.load().await.unwrap();
    assert_eq!(pending.media_path.as_deref(), Some(chart_path.as_path()));
}
