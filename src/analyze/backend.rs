// src/analyze/backend.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::analyze::insight::InsightError;
use crate::config::InsightConfig;

/// Chat-style reasoning service: one system instruction, one user message, one reply.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, InsightError>;
    fn name(&self) -> &'static str;
}

/// OpenRouter chat completions (OpenAI-compatible wire format).
pub struct OpenRouterBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    referer: String,
    title: String,
}

impl OpenRouterBackend {
    pub fn new(cfg: &InsightConfig) -> Result<Self, InsightError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("onchain-analyst/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| InsightError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            referer: cfg.referer.clone(),
            title: cfg.title.clone(),
        })
    }
}

#[async_trait]
impl ReasoningBackend for OpenRouterBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, InsightError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&req)
            .send()
            .await
            .map_err(|e| InsightError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InsightError::Backend {
                status: status.as_u16(),
                body: crate::chain::rpc::excerpt(&body, 300),
            });
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| InsightError::MalformedResponse(format!("completion envelope: {e}")))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(InsightError::EmptyResponse)
    }

    fn name(&self) -> &'static str {
        "openrouter"
    }
}
