//! Certificate signing against the VPN API.
//!
//! Uses reqwest to exchange the client's public key for a short-lived
//! certificate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use smartvpn_crypto::VpnCertificate;

/// Certificate signing errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("VPN API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid certificate response: {0}")]
    InvalidResponse(String),
}

/// Exchanges a public key for a signed client certificate.
#[async_trait]
pub trait CertificateSigner: Send + Sync {
    /// `public_key` is the base64 X25519 public key.
    async fn sign(&self, public_key: &str) -> Result<VpnCertificate, SignerError>;
}

/// Connection settings for the VPN API.
#[derive(Debug, Clone)]
pub struct ApiSignerConfig {
    /// API base URL (e.g. "<https://api.example.net>").
    pub base_url: String,
    /// Session access token.
    pub token: String,
    /// Name shown in the user's device list.
    pub device_name: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateRequest<'a> {
    client_public_key: &'a str,
    client_public_key_mode: &'static str,
    mode: &'static str,
    device_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateResponse {
    certificate: String,
    expiration_time: u64,
    refresh_time: u64,
}

impl TryFrom<CertificateResponse> for VpnCertificate {
    type Error = SignerError;

    fn try_from(response: CertificateResponse) -> Result<Self, Self::Error> {
        Self::new(
            response.certificate,
            response.expiration_time,
            response.refresh_time,
        )
        .map_err(|e| SignerError::InvalidResponse(e.to_string()))
    }
}

/// VPN API client for `/vpn/v1/certificate`.
#[derive(Debug)]
pub struct ApiCertificateSigner {
    http: reqwest::Client,
    base_url: String,
    device_name: String,
}

impl ApiCertificateSigner {
    pub fn new(config: &ApiSignerConfig) -> Result<Self, SignerError> {
        if config.base_url.is_empty() {
            return Err(SignerError::Config("base_url is empty".into()));
        }
        if config.token.is_empty() {
            return Err(SignerError::Config("token is empty".into()));
        }

        let mut headers = HeaderMap::new();
        let token_val = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| SignerError::Config("Invalid token format".into()))?;
        headers.insert(AUTHORIZATION, token_val);

        // reqwest is built with rustls-no-provider; a second install is a no-op error.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            device_name: config.device_name.clone(),
        })
    }

    pub(crate) fn certificate_url(&self) -> String {
        format!("{}/vpn/v1/certificate", self.base_url)
    }
}

#[async_trait]
impl CertificateSigner for ApiCertificateSigner {
    async fn sign(&self, public_key: &str) -> Result<VpnCertificate, SignerError> {
        let body = CertificateRequest {
            client_public_key: public_key,
            client_public_key_mode: "EC",
            mode: "session",
            device_name: &self.device_name,
        };
        let resp = self
            .http
            .post(self.certificate_url())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SignerError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").into(),
            });
        }
        let parsed: CertificateResponse = resp.json().await?;
        parsed.try_into()
    }
}
