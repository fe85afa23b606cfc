use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use portline_agent::audit::TracingAuditSink;
use portline_agent::buffer::MessageBuffer;
use portline_agent::clients::{ClientError, Collaborators, RestClient};
use portline_agent::context::ContextDataManager;
use portline_agent::delivery::TurnDispatcher;
use portline_agent::llm::{LlmError, OpenAiCompatibleClient};
use portline_agent::prompt::{PromptBuilder, PromptError};
use portline_agent::retention::RetentionService;
use portline_agent::retrieval::NoopRetriever;
use portline_agent::runtime::{AgentRuntime, RuntimeSettings};
use portline_agent::state::ConversationService;
use portline_agent::tools::{CheckoutUrls, ToolInvoker, ToolRegistry};
use portline_core::config::{AppConfig, ConfigError, ServicesConfig};
use portline_core::crypto::{AesGcmCipher, CryptoError};
use portline_db::{
    connect_with_settings, migrations, DbPool, SqlConversationRepository, SqlMessageRepository,
};
use portline_whatsapp::{CloudApiSender, DeliveryError, RetryPolicy};

use crate::api::ApiState;

const RETENTION_SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub context: Arc<ContextDataManager>,
    pub retention: Arc<RetentionService>,
    pub buffer: MessageBuffer,
}

impl Application {
    pub fn api_state(&self) -> ApiState {
        ApiState {
            runtime: Arc::clone(&self.runtime),
            context: Arc::clone(&self.context),
            buffer: self.buffer.clone(),
            verify_token: self.config.whatsapp.verify_token.clone(),
            sender_prefix_len: self.config.whatsapp.sender_prefix_len,
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("security.encryption_key is unusable: {0}")]
    Cipher(#[from] CryptoError),
    #[error("collaborator client setup failed: {0}")]
    Collaborator(#[from] ClientError),
    #[error("model client setup failed: {0}")]
    Model(#[from] LlmError),
    #[error("prompt template failed to load: {0}")]
    Prompt(#[from] PromptError),
    #[error("whatsapp sender setup failed: {0}")]
    Delivery(#[from] DeliveryError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let conversations = Arc::new(
        ConversationService::new(
            Arc::new(SqlConversationRepository::new(db_pool.clone())),
            Arc::new(SqlMessageRepository::new(db_pool.clone())),
        )
        .with_audit_sink(Arc::new(TracingAuditSink)),
    );
    let cipher = AesGcmCipher::from_base64_key(&config.security.encryption_key)?;
    let context = Arc::new(ContextDataManager::new(Arc::clone(&conversations), Arc::new(cipher)));

    let registry = ToolRegistry::business(
        &collaborators(&config.services)?,
        CheckoutUrls::new(
            config.services.checkout_success_url.clone(),
            config.services.checkout_cancel_url.clone(),
        ),
    );
    info!(event_name = "system.bootstrap.tools_registered", tools = registry.len(), "business tools registered");

    let runtime = Arc::new(AgentRuntime::new(
        Arc::clone(&conversations),
        Arc::new(ToolInvoker::new(registry, Arc::clone(&context))),
        Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?),
        Arc::new(NoopRetriever),
        PromptBuilder::new()?,
        RuntimeSettings::from_config(&config),
    ));

    let sender = Arc::new(CloudApiSender::new(
        config.whatsapp.api_url.clone(),
        config.whatsapp.access_token.clone(),
        Duration::from_secs(config.services.timeout_secs),
        RetryPolicy::default(),
    )?);
    let buffer = MessageBuffer::new(
        Duration::from_millis(config.buffer.quiescence_ms),
        Arc::new(TurnDispatcher::new(Arc::clone(&runtime), sender)),
    );
    let retention =
        Arc::new(RetentionService::new(Arc::clone(&conversations), config.retention.retention_days));

    info!(
        event_name = "system.bootstrap.ready",
        llm_provider = ?config.llm.provider,
        model = %config.llm.model,
        quiescence_ms = config.buffer.quiescence_ms,
        "application wired"
    );
    Ok(Application { config, db_pool, runtime, context, retention, buffer })
}

fn collaborators(services: &ServicesConfig) -> Result<Collaborators, ClientError> {
    let timeout = Duration::from_secs(services.timeout_secs);
    Ok(Collaborators {
        customers: Arc::new(RestClient::new(services.customers_url.clone(), timeout)?),
        addresses: Arc::new(RestClient::new(services.addresses_url.clone(), timeout)?),
        orders: Arc::new(RestClient::new(services.orders_url.clone(), timeout)?),
        products: Arc::new(RestClient::new(services.products_url.clone(), timeout)?),
        payments: Arc::new(RestClient::new(services.payments_url.clone(), timeout)?),
        scraper: Arc::new(RestClient::new(services.scraper_url.clone(), timeout)?),
    })
}

/// Daily purge of sensitive context from idle conversations.
pub fn spawn_retention_sweep(retention: Arc<RetentionService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(sweep_error) = retention.cleanup_sensitive_data(Utc::now()).await {
                error!(
                    event_name = "retention.sweep.failed",
                    error = %sweep_error,
                    "scheduled retention sweep failed"
                );
            }
        }
    })
}
