//! Asynchronous webhook fan-out for push events.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::types::{PushEvent, Webhook};

type HmacSha256 = Hmac<Sha256>;

const USER_AGENT: &str = "Origin-Webhook/1.0";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    client: reqwest::Client,
}

impl Dispatcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Hook(format!("build webhook client: {e}")))?;
        Ok(Self { client })
    }

    /// Serialize the event once and spawn one delivery task per destination.
    /// Tasks are not joined here; the caller drains the set when it wants a
    /// completion bound. Each request is capped by the 5-second client
    /// timeout, so draining never blocks past that.
    pub fn deliver(&self, tasks: &mut JoinSet<()>, webhooks: &[Webhook], event: &PushEvent) {
        let body = match serde_json::to_vec(event) {
            Ok(b) => Arc::new(b),
            Err(e) => {
                error!("webhook: marshal payload: {e}");
                return;
            }
        };

        for webhook in webhooks {
            let client = self.client.clone();
            let url = webhook.url.clone();
            let secret = webhook.secret.clone();
            let body = Arc::clone(&body);
            tasks.spawn(async move {
                deliver_one(&client, &url, secret.as_deref(), &body).await;
            });
        }
    }
}

async fn deliver_one(client: &reqwest::Client, url: &str, secret: Option<&str>, body: &[u8]) {
    let mut request = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header("X-Origin-Event", "push")
        .body(body.to_vec());

    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        request = request.header(
            "X-Origin-Signature",
            format!("sha256={}", sign(secret.as_bytes(), body)),
        );
    }

    match request.send().await {
        Ok(response) if response.status().as_u16() >= 400 => {
            warn!(url, status = response.status().as_u16(), "webhook: non-success response");
        }
        Ok(response) => {
            info!(url, status = response.status().as_u16(), "webhook: delivered");
        }
        Err(e) => {
            error!(url, error = %e, "webhook: delivery failed");
        }
    }
}

/// Lowercase hex HMAC-SHA256 over the literal body bytes.
#[must_use]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
