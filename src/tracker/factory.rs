//! Client factory owning one pooled transport per tracker kind.
//!
//! The transport map is only written at client-creation time; all
//! conversations against the same tracker kind share one connection pool.
//! The factory is constructed once at startup and dependency-injected, never
//! a global.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::RwLock;

use crate::config::TransportConfig;
use crate::credentials::TrackerCredential;
use crate::error::TrackerError;
use crate::tracker::{AzureDevOpsClient, JiraClient, TrackerClient, TrackerKind};

pub struct ClientFactory {
    config: TransportConfig,
    transports: RwLock<HashMap<TrackerKind, Client>>,
}

impl ClientFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Build a client for the credential's tracker, bound to the shared
    /// transport for that kind and an optional project context.
    pub async fn get_client(
        &self,
        credential: &TrackerCredential,
        project: Option<String>,
    ) -> Result<Arc<dyn TrackerClient>, TrackerError> {
        let transport = self.transport(credential.kind).await?;
        let retries = self.config.retries;

        let client: Arc<dyn TrackerClient> = match credential.kind {
            TrackerKind::Jira => Arc::new(JiraClient::new(transport, credential, project, retries)),
            TrackerKind::AzureDevOps => Arc::new(AzureDevOpsClient::new(
                transport, credential, project, retries,
            )),
        };
        Ok(client)
    }

    async fn transport(&self, kind: TrackerKind) -> Result<Client, TrackerError> {
        {
            let transports = self.transports.read().await;
            if let Some(client) = transports.get(&kind) {
                return Ok(client.clone());
            }
        }

        let mut transports = self.transports.write().await;
        // Double-check after acquiring the write lock.
        if let Some(client) = transports.get(&kind) {
            return Ok(client.clone());
        }

        tracing::info!(tracker = kind.as_str(), "creating pooled transport");
        let client = Client::builder()
            .pool_max_idle_per_host(self.config.max_idle_per_host)
            .pool_idle_timeout(self.config.idle_timeout)
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|source| TrackerError::Http {
                tracker: kind.as_str(),
                source,
            })?;

        transports.insert(kind, client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use uuid::Uuid;

    fn credential(kind: TrackerKind) -> TrackerCredential {
        TrackerCredential {
            id: Uuid::new_v4(),
            user_id: "user-1".into(),
            kind,
            base_domain: match kind {
                TrackerKind::Jira => "acme.atlassian.net".into(),
                TrackerKind::AzureDevOps => "dev.azure.com/acme".into(),
            },
            email: "bot@acme.test".into(),
            secret: SecretString::from("token"),
        }
    }

    #[tokio::test]
    async fn transport_is_shared_per_kind() {
        let factory = ClientFactory::new(TransportConfig::default());

        let _ = factory
            .get_client(&credential(TrackerKind::Jira), Some("PZ".into()))
            .await
            .unwrap();
        let _ = factory
            .get_client(&credential(TrackerKind::Jira), Some("OPS".into()))
            .await
            .unwrap();
        let _ = factory
            .get_client(&credential(TrackerKind::AzureDevOps), None)
            .await
            .unwrap();

        let transports = factory.transports.read().await;
        assert_eq!(transports.len(), 2);
    }

    #[tokio::test]
    async fn client_kind_matches_credential() {
        let factory = ClientFactory::new(TransportConfig::default());
        let client = factory
            .get_client(&credential(TrackerKind::AzureDevOps), Some("Ops".into()))
            .await
            .unwrap();
        assert_eq!(client.kind(), TrackerKind::AzureDevOps);
    }
}
