mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface shared by the front-ends, the admin
/// CLI, and the hook subprocesses.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Repository operations
    fn create_repo(
        &self,
        name: &str,
        description: Option<&str>,
        is_private: bool,
        default_branch: &str,
    ) -> Result<Repository>;
    fn get_repo(&self, name: &str) -> Result<Option<Repository>>;
    fn list_repos(&self) -> Result<Vec<Repository>>;
    fn rename_repo(&self, old_name: &str, new_name: &str) -> Result<()>;
    fn delete_repo(&self, name: &str) -> Result<bool>;

    // Signing key operations
    fn create_key(&self, name: &str, public_key: &str, fingerprint: &str) -> Result<SigningKey>;
    fn get_key_by_fingerprint(&self, fingerprint: &str) -> Result<Option<SigningKey>>;
    fn list_keys(&self) -> Result<Vec<SigningKey>>;
    fn delete_key(&self, fingerprint: &str) -> Result<bool>;

    // Webhook operations
    fn create_webhook(&self, repo_id: i64, url: &str, secret: Option<&str>) -> Result<Webhook>;
    fn list_webhooks(&self, repo_id: i64) -> Result<Vec<Webhook>>;
    fn list_active_webhooks(&self, repo_name: &str) -> Result<Vec<Webhook>>;
    fn delete_webhook(&self, id: i64) -> Result<bool>;
}
