use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_private: bool,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A registered SSH signing key. The fingerprint is the normalized
/// `SHA256:` form computed over the key's wire-format bytes; it is the
/// identity used for connection auth and allowed-signers lookup alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKey {
    pub id: i64,
    pub name: String,
    pub public_key: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i64,
    pub repo_id: i64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// The JSON payload delivered to webhook URLs on push. Field order is part
/// of the delivery contract; consumers verify HMAC over the literal bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub event: String,
    pub repository: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: String,
    pub after: String,
    pub pusher: String,
    pub timestamp: String,
}

impl PushEvent {
    pub fn push(repository: &str, git_ref: &str, before: &str, after: &str, pusher: &str) -> Self {
        Self {
            event: "push".to_string(),
            repository: repository.to_string(),
            git_ref: git_ref.to_string(),
            before: before.to_string(),
            after: after.to_string(),
            pusher: pusher.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}
