use reqwest::Client;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum RedeemError {
    Http(reqwest::Error),
    ServerError { status: u16, body: String },
}

impl fmt::Display for RedeemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedeemError::Http(e) => write!(f, "HTTP error: {e}"),
            RedeemError::ServerError { status, body } => {
                write!(f, "server returned {status}: {body}")
            }
        }
    }
}

impl From<reqwest::Error> for RedeemError {
    fn from(e: reqwest::Error) -> Self {
        RedeemError::Http(e)
    }
}

/// Client for the gift-code redemption endpoint.
///
/// The gateway sessions only hand over `(code, channel_id)` pairs; the
/// endpoint URL and the redeeming account's token live here.
pub struct RedeemClient {
    client: Client,
    base_url: String,
    token: String,
}

impl RedeemClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Redeem `code` against the channel it was posted in. Success is an
    /// HTTP 2xx; anything else comes back with the response body for the
    /// logs.
    pub async fn redeem(&self, code: &str, channel_id: &str) -> Result<(), RedeemError> {
        let url = format!(
            "{}/entitlements/gift-codes/{}/redeem",
            self.base_url, code
        );
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.token)
            .header("payment_source_id", "null")
            .json(&json!({
                "channel_id": channel_id,
                "gateway_checkout_context": null,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RedeemError::ServerError { status, body });
        }

        Ok(())
    }
}
