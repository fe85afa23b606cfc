use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::AesGcmCipher;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub llm: LlmConfig,
    pub orchestrator: OrchestratorConfig,
    pub buffer: BufferConfig,
    pub security: SecurityConfig,
    pub retention: RetentionConfig,
    pub services: ServicesConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    /// Graph API base, including version segment and trailing slash.
    pub api_url: String,
    pub access_token: SecretString,
    pub verify_token: SecretString,
    /// Characters dropped after the two-digit country code when deriving conversation keys.
    pub sender_prefix_len: usize,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_tool_iterations: u32,
    pub retrieval_top_k: usize,
    pub retrieval_similarity_threshold: f32,
    pub history_window: usize,
}

#[derive(Clone, Debug)]
pub struct BufferConfig {
    pub quiescence_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Base64 of a 32-byte AES-256-GCM key.
    pub encryption_key: SecretString,
}

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub retention_days: u32,
}

#[derive(Clone, Debug)]
pub struct ServicesConfig {
    pub customers_url: String,
    pub addresses_url: String,
    pub orders_url: String,
    pub products_url: String,
    pub payments_url: String,
    pub scraper_url: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_verify_token: Option<String>,
    pub encryption_key: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://portline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            whatsapp: WhatsAppConfig {
                api_url: "https://graph.facebook.com/v18.0/".to_string(),
                access_token: String::new().into(),
                verify_token: String::new().into(),
                sender_prefix_len: 1,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                temperature: 0.3,
                timeout_secs: 60,
                max_retries: 2,
            },
            orchestrator: OrchestratorConfig {
                max_tool_iterations: 2,
                retrieval_top_k: 5,
                retrieval_similarity_threshold: 0.5,
                history_window: 50,
            },
            buffer: BufferConfig { quiescence_ms: 8_000 },
            security: SecurityConfig { encryption_key: String::new().into() },
            retention: RetentionConfig { retention_days: 30 },
            services: ServicesConfig {
                customers_url: "http://localhost:8081/".to_string(),
                addresses_url: "http://localhost:8082/".to_string(),
                orders_url: "http://localhost:8083/".to_string(),
                products_url: "http://localhost:8084/".to_string(),
                payments_url: "http://localhost:8085/".to_string(),
                scraper_url: "http://localhost:8086/".to_string(),
                checkout_success_url: "https://example.com/checkout/success".to_string(),
                checkout_cancel_url: "https://example.com/checkout/cancel".to_string(),
                timeout_secs: 15,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("portline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(api_url) = whatsapp.api_url {
                self.whatsapp.api_url = api_url;
            }
            if let Some(access_token) = whatsapp.access_token {
                self.whatsapp.access_token = secret_value(access_token);
            }
            if let Some(verify_token) = whatsapp.verify_token {
                self.whatsapp.verify_token = secret_value(verify_token);
            }
            if let Some(sender_prefix_len) = whatsapp.sender_prefix_len {
                self.whatsapp.sender_prefix_len = sender_prefix_len;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(orchestrator) = patch.orchestrator {
            if let Some(max_tool_iterations) = orchestrator.max_tool_iterations {
                self.orchestrator.max_tool_iterations = max_tool_iterations;
            }
            if let Some(retrieval_top_k) = orchestrator.retrieval_top_k {
                self.orchestrator.retrieval_top_k = retrieval_top_k;
            }
            if let Some(threshold) = orchestrator.retrieval_similarity_threshold {
                self.orchestrator.retrieval_similarity_threshold = threshold;
            }
            if let Some(history_window) = orchestrator.history_window {
                self.orchestrator.history_window = history_window;
            }
        }

        if let Some(buffer) = patch.buffer {
            if let Some(quiescence_ms) = buffer.quiescence_ms {
                self.buffer.quiescence_ms = quiescence_ms;
            }
        }

        if let Some(security) = patch.security {
            if let Some(encryption_key) = security.encryption_key {
                self.security.encryption_key = secret_value(encryption_key);
            }
        }

        if let Some(retention) = patch.retention {
            if let Some(retention_days) = retention.retention_days {
                self.retention.retention_days = retention_days;
            }
        }

        if let Some(services) = patch.services {
            let target = &mut self.services;
            let urls = [
                (services.customers_url, &mut target.customers_url),
                (services.addresses_url, &mut target.addresses_url),
                (services.orders_url, &mut target.orders_url),
                (services.products_url, &mut target.products_url),
                (services.payments_url, &mut target.payments_url),
                (services.scraper_url, &mut target.scraper_url),
                (services.checkout_success_url, &mut target.checkout_success_url),
                (services.checkout_cancel_url, &mut target.checkout_cancel_url),
            ];
            for (value, slot) in urls {
                if let Some(value) = value {
                    *slot = value;
                }
            }
            if let Some(timeout_secs) = services.timeout_secs {
                target.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PORTLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PORTLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("PORTLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PORTLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("PORTLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PORTLINE_WHATSAPP_API_URL") {
            self.whatsapp.api_url = value;
        }
        if let Some(value) = read_env("PORTLINE_WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = secret_value(value);
        }
        if let Some(value) = read_env("PORTLINE_WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.verify_token = secret_value(value);
        }
        if let Some(value) = read_env("PORTLINE_WHATSAPP_SENDER_PREFIX_LEN") {
            self.whatsapp.sender_prefix_len =
                parse_env("PORTLINE_WHATSAPP_SENDER_PREFIX_LEN", &value)?;
        }

        if let Some(value) = read_env("PORTLINE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PORTLINE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PORTLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PORTLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PORTLINE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("PORTLINE_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("PORTLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("PORTLINE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PORTLINE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("PORTLINE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("PORTLINE_ORCHESTRATOR_MAX_TOOL_ITERATIONS") {
            self.orchestrator.max_tool_iterations =
                parse_env("PORTLINE_ORCHESTRATOR_MAX_TOOL_ITERATIONS", &value)?;
        }
        if let Some(value) = read_env("PORTLINE_ORCHESTRATOR_HISTORY_WINDOW") {
            self.orchestrator.history_window =
                parse_env("PORTLINE_ORCHESTRATOR_HISTORY_WINDOW", &value)?;
        }

        if let Some(value) = read_env("PORTLINE_BUFFER_QUIESCENCE_MS") {
            self.buffer.quiescence_ms = parse_env("PORTLINE_BUFFER_QUIESCENCE_MS", &value)?;
        }

        if let Some(value) = read_env("PORTLINE_SECURITY_ENCRYPTION_KEY") {
            self.security.encryption_key = secret_value(value);
        }

        if let Some(value) = read_env("PORTLINE_RETENTION_DAYS") {
            self.retention.retention_days = parse_env("PORTLINE_RETENTION_DAYS", &value)?;
        }

        if let Some(value) = read_env("PORTLINE_SERVICES_CUSTOMERS_URL") {
            self.services.customers_url = value;
        }
        if let Some(value) = read_env("PORTLINE_SERVICES_ADDRESSES_URL") {
            self.services.addresses_url = value;
        }
        if let Some(value) = read_env("PORTLINE_SERVICES_ORDERS_URL") {
            self.services.orders_url = value;
        }
        if let Some(value) = read_env("PORTLINE_SERVICES_PRODUCTS_URL") {
            self.services.products_url = value;
        }
        if let Some(value) = read_env("PORTLINE_SERVICES_PAYMENTS_URL") {
            self.services.payments_url = value;
        }
        if let Some(value) = read_env("PORTLINE_SERVICES_SCRAPER_URL") {
            self.services.scraper_url = value;
        }

        if let Some(value) = read_env("PORTLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PORTLINE_SERVER_PORT") {
            self.server.port = parse_env("PORTLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PORTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("PORTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("PORTLINE_LOGGING_LEVEL").or_else(|| read_env("PORTLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PORTLINE_LOGGING_FORMAT").or_else(|| read_env("PORTLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(access_token) = overrides.whatsapp_access_token {
            self.whatsapp.access_token = secret_value(access_token);
        }
        if let Some(verify_token) = overrides.whatsapp_verify_token {
            self.whatsapp.verify_token = secret_value(verify_token);
        }
        if let Some(encryption_key) = overrides.encryption_key {
            self.security.encryption_key = secret_value(encryption_key);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_llm(&self.llm)?;
        validate_orchestrator(&self.orchestrator)?;
        validate_buffer(&self.buffer)?;
        validate_security(&self.security)?;
        validate_retention(&self.retention)?;
        validate_services(&self.services)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("portline.toml"), PathBuf::from("config/portline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` placeholders from the process environment.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("${") {
        output.push_str(&rest[..open]);
        let placeholder = &rest[open + 2..];
        let close = placeholder.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &placeholder[..close];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &placeholder[close + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

fn check(condition: bool, message: impl Into<String>) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.into()))
    }
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    check(min <= value && value <= max, format!("{name} must be in range {min}..={max}"))
}

fn check_secret(name: &str, value: &SecretString, hint: &str) -> Result<(), ConfigError> {
    check(!value.expose_secret().trim().is_empty(), format!("{name} is required; {hint}"))
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    check(
        ["sqlite://", "sqlite::"].iter().any(|prefix| url.starts_with(prefix)) || url == ":memory:",
        "database.url must point at SQLite (`sqlite://portline.db` or `sqlite::memory:`)",
    )?;
    check_range("database.max_connections", database.max_connections, 1, 64)?;
    check_range("database.timeout_secs", database.timeout_secs, 1, 300)
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    check(
        is_http_url(&whatsapp.api_url) && whatsapp.api_url.ends_with('/'),
        "whatsapp.api_url must be the Graph API base URL ending with `/` \
         (e.g. https://graph.facebook.com/v18.0/)",
    )?;
    check_secret(
        "whatsapp.access_token",
        &whatsapp.access_token,
        "copy it from Meta for Developers > Your App > WhatsApp > API Setup",
    )?;
    check_secret(
        "whatsapp.verify_token",
        &whatsapp.verify_token,
        "it must match the token set on the webhook subscription",
    )?;
    check_range("whatsapp.sender_prefix_len", whatsapp.sender_prefix_len, 0, 3)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    check_range("llm.timeout_secs", llm.timeout_secs, 1, 300)?;
    check_range("llm.temperature", llm.temperature, 0.0, 2.0)?;
    check(!llm.model.trim().is_empty(), "llm.model names the chat model and cannot be empty")?;

    match llm.provider {
        LlmProvider::OpenAi => {
            let has_key =
                llm.api_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty());
            check(has_key, "llm.api_key is required when llm.provider = \"openai\"")
        }
        LlmProvider::Ollama => {
            let has_url = llm.base_url.as_deref().is_some_and(|url| is_http_url(url.trim()));
            check(has_url, "llm.base_url must be an http(s) URL when llm.provider = \"ollama\"")
        }
    }
}

fn validate_orchestrator(orchestrator: &OrchestratorConfig) -> Result<(), ConfigError> {
    check_range("orchestrator.max_tool_iterations", orchestrator.max_tool_iterations, 1, 20)?;
    check_range("orchestrator.retrieval_top_k", orchestrator.retrieval_top_k, 1, 50)?;
    check_range("orchestrator.history_window", orchestrator.history_window, 1, 500)?;
    check_range(
        "orchestrator.retrieval_similarity_threshold",
        orchestrator.retrieval_similarity_threshold,
        0.0,
        1.0,
    )
}

fn validate_buffer(buffer: &BufferConfig) -> Result<(), ConfigError> {
    check_range("buffer.quiescence_ms", buffer.quiescence_ms, 1, 600_000)
}

fn validate_security(security: &SecurityConfig) -> Result<(), ConfigError> {
    check_secret(
        "security.encryption_key",
        &security.encryption_key,
        "use base64 of 32 random bytes (`openssl rand -base64 32`)",
    )?;
    AesGcmCipher::from_base64_key(&security.encryption_key).map_err(|error| {
        ConfigError::Validation(format!("security.encryption_key is invalid: {error}"))
    })?;
    Ok(())
}

fn validate_retention(retention: &RetentionConfig) -> Result<(), ConfigError> {
    check_range("retention.retention_days", retention.retention_days, 1, 3650)
}

fn validate_services(services: &ServicesConfig) -> Result<(), ConfigError> {
    let urls = [
        ("services.customers_url", &services.customers_url),
        ("services.addresses_url", &services.addresses_url),
        ("services.orders_url", &services.orders_url),
        ("services.products_url", &services.products_url),
        ("services.payments_url", &services.payments_url),
        ("services.scraper_url", &services.scraper_url),
        ("services.checkout_success_url", &services.checkout_success_url),
        ("services.checkout_cancel_url", &services.checkout_cancel_url),
    ];
    for (name, url) in urls {
        check(is_http_url(url), format!("{name} must start with http:// or https://"))?;
    }
    check_range("services.timeout_secs", services.timeout_secs, 1, 300)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    check(server.port != 0, "server.port cannot be 0")?;
    check_range("server.graceful_shutdown_secs", server.graceful_shutdown_secs, 1, 300)
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    check(
        matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error"),
        format!("logging.level `{}` is not one of trace|debug|info|warn|error", logging.level),
    )
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    whatsapp: Option<WhatsAppPatch>,
    llm: Option<LlmPatch>,
    orchestrator: Option<OrchestratorPatch>,
    buffer: Option<BufferPatch>,
    security: Option<SecurityPatch>,
    retention: Option<RetentionPatch>,
    services: Option<ServicesPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    api_url: Option<String>,
    access_token: Option<String>,
    verify_token: Option<String>,
    sender_prefix_len: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorPatch {
    max_tool_iterations: Option<u32>,
    retrieval_top_k: Option<usize>,
    retrieval_similarity_threshold: Option<f32>,
    history_window: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct BufferPatch {
    quiescence_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityPatch {
    encryption_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RetentionPatch {
    retention_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicesPatch {
    customers_url: Option<String>,
    addresses_url: Option<String>,
    orders_url: Option<String>,
    products_url: Option<String>,
    payments_url: Option<String>,
    scraper_url: Option<String>,
    checkout_success_url: Option<String>,
    checkout_cancel_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
