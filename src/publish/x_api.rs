// src/publish/x_api.rs
//! Primary channel: X API v2 posting with OAuth 1.0a user context, media
//! through the v1.1 upload endpoint.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::PublishConfig;
use crate::publish::oauth::OAuthSigner;
use crate::publish::{Delivery, DeliveryMethod, PublishError, PublishRequest, Publisher};

const MEDIA_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Clone)]
pub struct XApiPublisher {
    client: reqwest::Client,
    signer: Option<OAuthSigner>,
    post_url: String,
    upload_url: String,
    handle: String,
    timeout: Duration,
}

impl XApiPublisher {
    pub fn new(cfg: &PublishConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            signer: cfg.credentials.clone().map(OAuthSigner::new),
            post_url: cfg.post_url.clone(),
            upload_url: cfg.upload_url.clone(),
            handle: cfg.handle.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.signer.is_some()
    }

    pub fn status_url(&self, id: &str) -> String {
        format!("https://x.com/{}/status/{id}", self.handle)
    }

    async fn upload_media(&self, signer: &OAuthSigner, path: &Path) -> Result<String, PublishError> {
        #[derive(Deserialize)]
        struct UploadResp {
            media_id_string: String,
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !MEDIA_EXTENSIONS.contains(&ext.as_str()) {
            return Err(PublishError::Transport(format!(
                "unsupported media type: {}",
                path.display()
            )));
        }
        let bytes = tokio::fs::read(path).await?;
        let form = reqwest::multipart::Form::new()
            .text(
                "media_data",
                base64::engine::general_purpose::STANDARD.encode(&bytes),
            )
            .text("media_category", "tweet_image");

        let auth = signer
            .authorization("POST", &self.upload_url, &[])
            .map_err(PublishError::Transport)?;
        let resp = self
            .client
            .post(&self.upload_url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;
        let body: UploadResp = resp
            .json()
            .await
            .map_err(|e| PublishError::Transport(format!("media upload response: {e}")))?;
        tracing::debug!(
            target: "publish",
            media_id = %body.media_id_string,
            kb = bytes.len() / 1024,
            "media uploaded"
        );
        Ok(body.media_id_string)
    }

    async fn post(&self, signer: &OAuthSigner, req: &PublishRequest<'_>) -> Result<Delivery, PublishError> {
        #[derive(Serialize)]
        struct Media {
            media_ids: Vec<String>,
        }
        #[derive(Serialize)]
        struct Reply<'a> {
            in_reply_to_tweet_id: &'a str,
        }
        #[derive(Serialize)]
        struct Payload<'a> {
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            media: Option<Media>,
            #[serde(skip_serializing_if = "Option::is_none")]
            reply: Option<Reply<'a>>,
        }
        #[derive(Deserialize)]
        struct PostResp {
            data: Option<PostData>,
        }
        #[derive(Deserialize)]
        struct PostData {
            id: String,
        }

        let mut media_id = None;
        if let Some(path) = req.media {
            match self.upload_media(signer, path).await {
                Ok(id) => media_id = Some(id),
                Err(e) => tracing::warn!(
                    target: "publish",
                    error = %e,
                    "media upload failed, posting text only"
                ),
            }
        }

        let payload = Payload {
            text: req.text,
            media: media_id.map(|id| Media { media_ids: vec![id] }),
            reply: req.reply_to.map(|id| Reply {
                in_reply_to_tweet_id: id,
            }),
        };
        let auth = signer
            .authorization("POST", &self.post_url, &[])
            .map_err(PublishError::Transport)?;
        let resp = self
            .client
            .post(&self.post_url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;
        let body: PostResp = resp
            .json()
            .await
            .map_err(|e| PublishError::Transport(format!("post response: {e}")))?;
        let id = body
            .data
            .map(|d| d.id)
            .ok_or_else(|| PublishError::Transport("post response carried no id".into()))?;
        Ok(Delivery {
            url: Some(self.status_url(&id)),
            post_id: Some(id),
            pending_path: None,
        })
    }
}

/// X error code for requests flagged as automated.
const AUTOMATION_ERROR_CODE: i64 = 226;

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<i64>,
}

/// Anti-automation rejections come back as 403, or carry error code 226.
fn is_blocked(status: u16, body: &str) -> bool {
    if status == 403 || body.to_ascii_lowercase().contains("automated") {
        return true;
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.errors.iter().any(|e| e.code == Some(AUTOMATION_ERROR_CODE)))
        .unwrap_or(false)
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, PublishError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let full = resp.text().await.unwrap_or_default();
    let blocked = is_blocked(status.as_u16(), &full);
    let body = crate::chain::rpc::excerpt(&full, 300);
    if blocked {
        Err(PublishError::Blocked(body))
    } else {
        Err(PublishError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Publisher for XApiPublisher {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::PrimaryApi
    }

    async fn publish(
        &self,
        req: &PublishRequest<'_>,
        _after: Option<&PublishError>,
    ) -> Result<Delivery, PublishError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or(PublishError::NotConfigured("x api credentials"))?;
        tracing::info!(
            target: "publish",
            chars = req.text.chars().count(),
            media = req.media.is_some(),
            reply = req.reply_to.is_some(),
            "posting via x api"
        );
        tokio::time::timeout(self.timeout, self.post(signer, req))
            .await
            .map_err(|_| PublishError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::XCredentials;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(server: &MockServer) -> PublishConfig {
        PublishConfig {
            post_url: format!("{}/2/tweets", server.uri()),
            upload_url: format!("{}/1.1/media/upload.json", server.uri()),
            handle: "baseanalyst".into(),
            timeout_secs: 5,
            credentials: Some(XCredentials {
                api_key: "ck".into(),
                api_key_secret: "cs".into(),
                access_token: "at".into(),
                access_token_secret: "ats".into(),
            }),
            ..PublishConfig::default()
        }
    }

    #[tokio::test]
    async fn posts_with_reply_and_builds_status_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "text": "base tvl up 3%",
                "reply": { "in_reply_to_tweet_id": "100" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": { "id": "1800", "text": "base tvl up 3%" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = XApiPublisher::new(&cfg(&server));
        let req = PublishRequest {
            text: "base tvl up 3%",
            media: None,
            reply_to: Some("100"),
        };
        let d = p.publish(&req, None).await.unwrap();
        assert_eq!(d.post_id.as_deref(), Some("1800"));
        assert_eq!(d.url.as_deref(), Some("https://x.com/baseanalyst/status/1800"));
    }

    #[tokio::test]
    async fn failed_media_upload_falls_back_to_text_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1.1/media/upload.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "7" } })))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let img = tmp.path().join("post-chart.png");
        std::fs::write(&img, b"\x89PNG").unwrap();
        let req = PublishRequest {
            text: "t",
            media: Some(&img),
            reply_to: None,
        };
        let d = XApiPublisher::new(&cfg(&server)).publish(&req, None).await.unwrap();
        assert_eq!(d.post_id.as_deref(), Some("7"));

        let posts: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == "/2/tweets")
            .collect();
        let body: serde_json::Value = serde_json::from_slice(&posts[0].body).unwrap();
        assert!(body.get("media").is_none());
    }

    #[tokio::test]
    async fn uploaded_media_id_is_attached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1.1/media/upload.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "media_id_string": "555" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(body_partial_json(json!({ "media": { "media_ids": ["555"] } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "8" } })))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let img = tmp.path().join("chart.PNG");
        std::fs::write(&img, b"\x89PNG").unwrap();
        let req = PublishRequest {
            text: "t",
            media: Some(&img),
            reply_to: None,
        };
        XApiPublisher::new(&cfg(&server)).publish(&req, None).await.unwrap();
    }

    #[tokio::test]
    async fn forbidden_is_classified_as_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                r#"{"detail":"This request looks like it might be automated."}"#,
            ))
            .mount(&server)
            .await;
        let err = XApiPublisher::new(&cfg(&server))
            .publish(&PublishRequest::text("t"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Blocked(_)), "{err:?}");
    }

    #[test]
    fn automation_code_is_matched_structurally() {
        assert!(is_blocked(400, r#"{"errors":[{"code":226,"message":"flagged"}]}"#));
        assert!(!is_blocked(400, r#"{"errors":[{"code":187}],"id":"1822600"}"#));
        assert!(!is_blocked(429, "rate limited at 12:26"));
    }

    #[tokio::test]
    async fn other_rejections_keep_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("duplicate content"))
            .mount(&server)
            .await;
        let err = XApiPublisher::new(&cfg(&server))
            .publish(&PublishRequest::text("t"), None)
            .await
            .unwrap_err();
        match err {
            PublishError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "duplicate content");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_api_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({ "data": { "id": "1" } }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        let err = XApiPublisher::new(&cfg(&server))
            .with_timeout(Duration::from_millis(200))
            .publish(&PublishRequest::text("t"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_credentials_is_not_configured() {
        let p = XApiPublisher::new(&PublishConfig::default());
        assert!(!p.is_configured());
        let err = p.publish(&PublishRequest::text("t"), None).await.unwrap_err();
        assert_eq!(err.kind(), "not_configured");
    }
}
