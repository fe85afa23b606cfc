use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use portline_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

/// One reported setting: dotted key, rendered value, overriding env var.
struct Entry {
    key: &'static str,
    value: String,
    env_key: Option<&'static str>,
}

fn entry(key: &'static str, value: impl ToString, env_key: Option<&'static str>) -> Entry {
    Entry { key, value: value.to_string(), env_key }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for item in entries(&config) {
        let source = field_source(
            item.key,
            item.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", item.key, item.value));
    }
    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let services = &config.services;
    vec![
        entry("database.url", &config.database.url, Some("PORTLINE_DATABASE_URL")),
        entry(
            "database.max_connections",
            config.database.max_connections,
            Some("PORTLINE_DATABASE_MAX_CONNECTIONS"),
        ),
        entry("database.timeout_secs", config.database.timeout_secs, Some("PORTLINE_DATABASE_TIMEOUT_SECS")),
        entry("whatsapp.api_url", &config.whatsapp.api_url, Some("PORTLINE_WHATSAPP_API_URL")),
        entry(
            "whatsapp.access_token",
            redact_token(config.whatsapp.access_token.expose_secret()),
            Some("PORTLINE_WHATSAPP_ACCESS_TOKEN"),
        ),
        entry(
            "whatsapp.verify_token",
            redact_secret(Some(&config.whatsapp.verify_token)),
            Some("PORTLINE_WHATSAPP_VERIFY_TOKEN"),
        ),
        entry(
            "whatsapp.sender_prefix_len",
            config.whatsapp.sender_prefix_len,
            Some("PORTLINE_WHATSAPP_SENDER_PREFIX_LEN"),
        ),
        entry("llm.provider", format!("{:?}", config.llm.provider), Some("PORTLINE_LLM_PROVIDER")),
        entry("llm.model", &config.llm.model, Some("PORTLINE_LLM_MODEL")),
        entry(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            Some("PORTLINE_LLM_BASE_URL"),
        ),
        entry("llm.api_key", redact_secret(config.llm.api_key.as_ref()), Some("PORTLINE_LLM_API_KEY")),
        entry("llm.temperature", config.llm.temperature, Some("PORTLINE_LLM_TEMPERATURE")),
        entry("llm.timeout_secs", config.llm.timeout_secs, Some("PORTLINE_LLM_TIMEOUT_SECS")),
        entry("llm.max_retries", config.llm.max_retries, Some("PORTLINE_LLM_MAX_RETRIES")),
        entry(
            "orchestrator.max_tool_iterations",
            config.orchestrator.max_tool_iterations,
            Some("PORTLINE_ORCHESTRATOR_MAX_TOOL_ITERATIONS"),
        ),
        entry("orchestrator.retrieval_top_k", config.orchestrator.retrieval_top_k, None),
        entry(
            "orchestrator.retrieval_similarity_threshold",
            config.orchestrator.retrieval_similarity_threshold,
            None,
        ),
        entry(
            "orchestrator.history_window",
            config.orchestrator.history_window,
            Some("PORTLINE_ORCHESTRATOR_HISTORY_WINDOW"),
        ),
        entry("buffer.quiescence_ms", config.buffer.quiescence_ms, Some("PORTLINE_BUFFER_QUIESCENCE_MS")),
        entry(
            "security.encryption_key",
            redact_secret(Some(&config.security.encryption_key)),
            Some("PORTLINE_SECURITY_ENCRYPTION_KEY"),
        ),
        entry("retention.retention_days", config.retention.retention_days, Some("PORTLINE_RETENTION_DAYS")),
        entry("services.customers_url", &services.customers_url, Some("PORTLINE_SERVICES_CUSTOMERS_URL")),
        entry("services.addresses_url", &services.addresses_url, Some("PORTLINE_SERVICES_ADDRESSES_URL")),
        entry("services.orders_url", &services.orders_url, Some("PORTLINE_SERVICES_ORDERS_URL")),
        entry("services.products_url", &services.products_url, Some("PORTLINE_SERVICES_PRODUCTS_URL")),
        entry("services.payments_url", &services.payments_url, Some("PORTLINE_SERVICES_PAYMENTS_URL")),
        entry("services.scraper_url", &services.scraper_url, Some("PORTLINE_SERVICES_SCRAPER_URL")),
        entry("services.checkout_success_url", &services.checkout_success_url, None),
        entry("services.checkout_cancel_url", &services.checkout_cancel_url, None),
        entry("services.timeout_secs", services.timeout_secs, None),
        entry("server.bind_address", &config.server.bind_address, Some("PORTLINE_SERVER_BIND_ADDRESS")),
        entry("server.port", config.server.port, Some("PORTLINE_SERVER_PORT")),
        entry(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            Some("PORTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        ),
        entry("logging.level", &config.logging.level, Some("PORTLINE_LOGGING_LEVEL")),
        entry("logging.format", format!("{:?}", config.logging.format), Some("PORTLINE_LOGGING_FORMAT")),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("portline.toml"), PathBuf::from("config/portline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret.map(|value| value.expose_secret().trim().is_empty()) {
        None | Some(true) => "<unset>",
        Some(false) => "<redacted>",
    }
}

/// Keeps a short prefix so operators can tell token kinds apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }
    let prefix: String = trimmed.chars().take(4).collect();
    if trimmed.chars().count() > 12 {
        return format!("{prefix}***");
    }
    "<redacted>".to_string()
}
