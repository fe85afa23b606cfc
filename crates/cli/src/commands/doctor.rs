use std::time::Duration;

use portline_agent::clients::RestClient;
use portline_agent::llm::OpenAiCompatibleClient;
use portline_core::config::{AppConfig, LoadOptions};
use portline_core::{AesGcmCipher, FieldCipher};
use portline_db::connect_with_settings;
use serde::Serialize;

const PROBE_PLAINTEXT: &str = "portline-doctor-probe";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_encryption_key(&config));
            checks.push(check_llm_client(&config));
            checks.push(check_collaborators(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in
                ["encryption_key", "llm_client", "collaborators", "database_connectivity", "schema"]
            {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_encryption_key(config: &AppConfig) -> DoctorCheck {
    let cipher = match AesGcmCipher::from_base64_key(&config.security.encryption_key) {
        Ok(cipher) => cipher,
        Err(error) => return DoctorCheck::fail("encryption_key", error.to_string()),
    };

    let round_trip = cipher
        .encrypt(PROBE_PLAINTEXT)
        .and_then(|ciphertext| cipher.decrypt(&ciphertext));
    match round_trip {
        Ok(plaintext) if plaintext == PROBE_PLAINTEXT => {
            DoctorCheck::pass("encryption_key", "AES-256-GCM round trip succeeded")
        }
        Ok(_) => DoctorCheck::fail("encryption_key", "round trip returned different plaintext"),
        Err(error) => DoctorCheck::fail("encryption_key", error.to_string()),
    }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            "llm_client",
            format!("model `{}` via {}", config.llm.model, client.endpoint()),
        ),
        Err(error) => DoctorCheck::fail("llm_client", error.to_string()),
    }
}

fn check_collaborators(config: &AppConfig) -> DoctorCheck {
    let services = &config.services;
    let timeout = Duration::from_secs(services.timeout_secs.max(1));
    let endpoints = [
        ("customers", &services.customers_url),
        ("addresses", &services.addresses_url),
        ("orders", &services.orders_url),
        ("products", &services.products_url),
        ("payments", &services.payments_url),
        ("scraper", &services.scraper_url),
    ];

    let mut problems = Vec::new();
    for (name, url) in endpoints {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            problems.push(format!("{name}: `{url}` is not an http(s) URL"));
            continue;
        }
        if let Err(error) = RestClient::new(url.as_str(), timeout) {
            problems.push(format!("{name}: {error}"));
        }
    }

    if problems.is_empty() {
        DoctorCheck::pass("collaborators", format!("{} service clients configured", endpoints.len()))
    } else {
        DoctorCheck::fail("collaborators", problems.join("; "))
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("schema", "the database was not reachable"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("schema", "the database was not reachable"),
                ];
            }
        };

        let connectivity = DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        );
        let schema = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'chat_conversation'",
        )
        .fetch_one(&pool)
        .await;
        let schema = match schema {
            Ok(1) => DoctorCheck::pass("schema", "conversation tables present"),
            Ok(_) => DoctorCheck::fail("schema", "conversation tables missing; run `portline migrate`"),
            Err(error) => DoctorCheck::fail("schema", error.to_string()),
        };

        pool.close().await;
        vec![connectivity, schema]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
