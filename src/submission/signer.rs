//! Remote signer boundary
//!
//! The engine never holds private keys. Unsigned transactions are sent to the
//! wallet backend together with the user's password, and come back signed.
//! A failure here is terminal for the attempt and never retried.

use crate::types::Credential;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// Wrong password or expired session
    #[error("Signer rejected the credential")]
    AuthFailed,

    #[error("Signer unavailable: {0}")]
    Unavailable(String),

    #[error("Signer returned an unusable response: {0}")]
    MalformedResponse(String),
}

/// Signing capability: base64 unsigned transaction in, base64 signed out
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    async fn sign(&self, credential: &Credential, unsigned_tx_base64: &str) -> Result<String, SignerError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    password: &'a str,
    unsigned_transaction: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signed_transaction: String,
}

/// HTTP signer: `POST {base_url}/wallet/sign-transaction` with a bearer token
pub struct HttpSigner {
    client: Client,
    base_url: String,
    token: Zeroizing<String>,
}

impl HttpSigner {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, SignerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignerError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: Zeroizing::new(token.into()),
        })
    }
}

#[async_trait]
impl RemoteSigner for HttpSigner {
    async fn sign(&self, credential: &Credential, unsigned_tx_base64: &str) -> Result<String, SignerError> {
        let url = format!("{}/wallet/sign-transaction", self.base_url);
        let body = SignRequest {
            password: credential.expose(),
            unsigned_transaction: unsigned_tx_base64,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| SignerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Signer rejected credential");
            return Err(SignerError::AuthFailed);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SignerError::Unavailable(format!("status {}: {}", status, text)));
        }

        let parsed: SignResponse = response
            .json()
            .await
            .map_err(|e| SignerError::MalformedResponse(e.to_string()))?;

        debug!(bytes = parsed.signed_transaction.len(), "Signer returned signed transaction");
        Ok(parsed.signed_transaction)
    }
}
