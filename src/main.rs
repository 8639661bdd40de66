//! Binary entry point: wire capabilities together and serve HTTP.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use uuid::Uuid;

use deskhand::agent::Orchestrator;
use deskhand::checkpoint::{CheckpointStore, MemoryCheckpointStore, PgCheckpointStore};
use deskhand::config::Config;
use deskhand::credentials::{MemoryCredentialStore, TrackerCredential};
use deskhand::knowledge::{HttpKnowledgeStore, KnowledgeStore, NoopKnowledgeStore};
use deskhand::llm::OpenAiChatProvider;
use deskhand::server::{AppState, router};
use deskhand::tracker::{ClientFactory, TrackerKind};

#[derive(Parser)]
#[command(name = "deskhand", about = "Conversational ticketing assistant")]
struct Args {
    /// Keep checkpoints in memory instead of PostgreSQL (dev only).
    #[arg(long)]
    memory: bool,

    /// Override the bind address from configuration.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskhand=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("loading configuration")?;

    let checkpoints: Arc<dyn CheckpointStore> = if args.memory {
        tracing::warn!("using in-memory checkpoints; threads will not survive a restart");
        Arc::new(MemoryCheckpointStore::new())
    } else {
        Arc::new(
            PgCheckpointStore::new(&config.database)
                .await
                .context("connecting to PostgreSQL")?,
        )
    };

    let llm = Arc::new(OpenAiChatProvider::new(config.llm.clone()));
    let knowledge: Arc<dyn KnowledgeStore> = match std::env::var("KNOWLEDGE_BASE_URL") {
        Ok(url) if !url.is_empty() => Arc::new(HttpKnowledgeStore::new(url)),
        _ => {
            tracing::warn!("KNOWLEDGE_BASE_URL not set; knowledge questions will come up empty");
            Arc::new(NoopKnowledgeStore)
        }
    };
    let factory = Arc::new(ClientFactory::new(config.transport.clone()));
    let credentials = Arc::new(MemoryCredentialStore::new());
    seed_credential(&credentials).await;

    let orchestrator = Arc::new(
        Orchestrator::new(llm, knowledge, checkpoints, config.agent.clone())
            .context("building the agent graph")?,
    );

    let state = AppState {
        orchestrator,
        credentials,
        factory,
    };

    let bind_addr = args.bind.unwrap_or(config.server.bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(%bind_addr, "deskhand listening");

    axum::serve(listener, router(state))
        .await
        .context("serving HTTP")?;
    Ok(())
}

/// Seed one tracker credential from the environment, for deployments that
/// run against a single tracker account. Multi-tenant credential storage
/// lives behind [`deskhand::credentials::CredentialStore`].
async fn seed_credential(store: &MemoryCredentialStore) {
    let Ok(kind) = std::env::var("TRACKER_KIND") else {
        return;
    };
    let kind = match kind.as_str() {
        "jira" => TrackerKind::Jira,
        "azure_devops" => TrackerKind::AzureDevOps,
        other => {
            tracing::warn!(kind = other, "unknown TRACKER_KIND, skipping credential seed");
            return;
        }
    };

    let (Ok(domain), Ok(secret)) = (
        std::env::var("TRACKER_DOMAIN"),
        std::env::var("TRACKER_SECRET"),
    ) else {
        tracing::warn!("TRACKER_KIND set but TRACKER_DOMAIN/TRACKER_SECRET missing");
        return;
    };

    let credential = TrackerCredential {
        id: std::env::var("TRACKER_CREDENTIAL_ID")
            .ok()
            .and_then(|v| Uuid::parse_str(&v).ok())
            .unwrap_or_else(Uuid::new_v4),
        user_id: std::env::var("TRACKER_USER").unwrap_or_else(|_| "local".to_string()),
        kind,
        base_domain: domain,
        email: std::env::var("TRACKER_EMAIL").unwrap_or_default(),
        secret: SecretString::from(secret),
    };
    tracing::info!(id = %credential.id, tracker = kind.as_str(), "seeded tracker credential");
    store.insert(credential).await;
}
