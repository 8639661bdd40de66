//! Tracker credential resolution.
//!
//! Credentials are stored and encrypted elsewhere; this capability hands the
//! decrypted value to exactly one consumer, the client factory. The secret is
//! wrapped in [`SecretString`] so it never lands in logs or `Debug` output.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::tracker::TrackerKind;

/// A credential for one tracker account, owned by one user.
#[derive(Clone)]
pub struct TrackerCredential {
    pub id: Uuid,
    pub user_id: String,
    pub kind: TrackerKind,
    /// e.g. `mycompany.atlassian.net` or `dev.azure.com/myorg`.
    pub base_domain: String,
    /// Account email (Jira basic auth pairs it with the API token).
    pub email: String,
    pub secret: SecretString,
}

impl std::fmt::Debug for TrackerCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerCredential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("kind", &self.kind)
            .field("base_domain", &self.base_domain)
            .field("email", &self.email)
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// Resolves credentials by id, scoped to the owning user.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn resolve(
        &self,
        credential_id: Uuid,
        user_id: &str,
    ) -> Result<TrackerCredential, TrackerError>;
}

/// In-memory credential store, seeded at startup. Ownership is enforced the
/// same way the persistent stores do it: a credential belonging to another
/// user is indistinguishable from a missing one.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<Uuid, TrackerCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, credential: TrackerCredential) {
        self.entries.write().await.insert(credential.id, credential);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn resolve(
        &self,
        credential_id: Uuid,
        user_id: &str,
    ) -> Result<TrackerCredential, TrackerError> {
        let entries = self.entries.read().await;
        entries
            .get(&credential_id)
            .filter(|c| c.user_id == user_id)
            .cloned()
            .ok_or(TrackerError::CredentialNotFound { credential_id })
    }
}
