use std::sync::Arc;

use chrono::Utc;
use portline_agent::retention::RetentionService;
use portline_agent::state::ConversationService;
use portline_core::domain::conversation::ConversationKey;
use portline_db::{migrations, SqlConversationRepository, SqlMessageRepository};

use crate::commands::{async_runtime, connect, load_config, CommandResult, Failure};

/// What the `cleanup` command should do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupMode {
    /// Purge every conversation idle past the retention window.
    Sweep,
    /// Report what a sweep would touch.
    Stats,
    /// Purge one conversation regardless of age.
    Conversation(String),
}

pub fn run(mode: CleanupMode) -> CommandResult {
    let config = match load_config("cleanup") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("cleanup") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let conversations = Arc::new(ConversationService::new(
            Arc::new(SqlConversationRepository::new(pool.clone())),
            Arc::new(SqlMessageRepository::new(pool.clone())),
        ));
        let retention = RetentionService::new(conversations, config.retention.retention_days);
        let retention_failed = |error: portline_agent::state::ConversationError| {
            ("retention", error.to_string(), 6u8)
        };

        let outcome = match mode {
            CleanupMode::Sweep => {
                let report =
                    retention.cleanup_sensitive_data(Utc::now()).await.map_err(retention_failed)?;
                (
                    format!(
                        "scanned {} conversations, cleaned {}, failed {}",
                        report.scanned, report.cleaned, report.failed
                    ),
                    serde_json::to_value(&report).ok(),
                )
            }
            CleanupMode::Stats => {
                let stats = retention.cleanup_stats(Utc::now()).await.map_err(retention_failed)?;
                (
                    format!(
                        "{} conversations older than {} days, {} pending cleanup",
                        stats.total_old_conversations, stats.retention_days, stats.pending_cleanup
                    ),
                    serde_json::to_value(&stats).ok(),
                )
            }
            CleanupMode::Conversation(key) => {
                let key = ConversationKey::new(key);
                let cleaned =
                    retention.cleanup_conversation(&key).await.map_err(retention_failed)?;
                let message = if cleaned {
                    format!("sensitive data removed from {}", key.masked())
                } else {
                    format!("nothing to remove for {}", key.masked())
                };
                (message, Some(serde_json::json!({ "cleaned": cleaned })))
            }
        };

        pool.close().await;
        Ok::<_, Failure>(outcome)
    });

    match result {
        Ok((message, details)) => CommandResult::success_with("cleanup", message, details),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("cleanup", error_class, message, exit_code)
        }
    }
}
