// src/publish/oauth.rs
//! OAuth 1.0a request signing (HMAC-SHA1, RFC 5849).

use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::distr::Alphanumeric;
use rand::Rng;
use sha1::Sha1;

use crate::config::XCredentials;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 percent-encoding: everything but `A-Za-z0-9-._~`.
pub fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Signature base string: `METHOD&url&sorted-params`, each part percent-encoded.
pub fn signature_base(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let param_str = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(url),
        percent_encode(&param_str)
    )
}

pub fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> Result<String, String> {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|err| format!("invalid oauth signing key: {err}"))?;
    mac.update(base.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[derive(Clone)]
pub struct OAuthSigner {
    creds: XCredentials,
}

impl OAuthSigner {
    pub fn new(creds: XCredentials) -> Self {
        Self { creds }
    }

    /// `Authorization` header value for a request. `extra` holds query or
    /// form parameters that take part in the signature; JSON bodies do not.
    pub fn authorization(
        &self,
        method: &str,
        url: &str,
        extra: &[(&str, &str)],
    ) -> Result<String, String> {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_with(method, url, extra, &nonce, &timestamp)
    }

    pub(crate) fn authorization_with(
        &self,
        method: &str,
        url: &str,
        extra: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, String> {
        let oauth: Vec<(String, String)> = vec![
            ("oauth_consumer_key".into(), self.creds.api_key.clone()),
            ("oauth_nonce".into(), nonce.to_string()),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), timestamp.to_string()),
            ("oauth_token".into(), self.creds.access_token.clone()),
            ("oauth_version".into(), "1.0".into()),
        ];
        let mut all = oauth.clone();
        all.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let base = signature_base(method, url, &all);
        let signature = sign(
            &base,
            &self.creds.api_key_secret,
            &self.creds.access_token_secret,
        )?;

        let mut header: Vec<(String, String)> = oauth;
        header.push(("oauth_signature".into(), signature));
        header.sort();
        let fields = header
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {fields}"))
    }
}
