use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hirewire_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::CommandResult;

struct ConfigFile {
    path: PathBuf,
    doc: Value,
}

/// One rendered row: dotted key, display value, and the env vars that can set it.
struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.to_string(), env_keys }
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::text(2, format!("config validation failed: {error}")),
    };

    let file = detect_config_path().and_then(|path| load_config_file(&path));

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields(&config).iter().map(|field| {
        format!("- {} = {} (source: {})", field.key, field.value, field_source(field, file.as_ref()))
    }));

    CommandResult::text(0, lines.join("\n"))
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let tiers = if config.tiers.is_empty() {
        "<none>".to_string()
    } else {
        config
            .tiers
            .iter()
            .map(|tier| format!("{}:{}ms", tier.model, tier.first_token_timeout_ms))
            .collect::<Vec<_>>()
            .join(", ")
    };

    vec![
        Field::new("database.url", &config.database.url, &["HIREWIRE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections,
            &["HIREWIRE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["HIREWIRE_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new("llm.provider", config.llm.provider.as_str(), &["HIREWIRE_LLM_PROVIDER"]),
        Field::new("llm.base_url", &config.llm.base_url, &["HIREWIRE_LLM_BASE_URL"]),
        Field::new("llm.api_key", redact_secret(config.llm.api_key.as_ref()), &[
            "HIREWIRE_LLM_API_KEY",
        ]),
        Field::new("llm.timeout_secs", config.llm.timeout_secs, &["HIREWIRE_LLM_TIMEOUT_SECS"]),
        Field::new("llm.max_rounds", config.llm.max_rounds, &["HIREWIRE_LLM_MAX_ROUNDS"]),
        Field::new("models.router", &config.models.router, &["HIREWIRE_MODEL_ROUTER"]),
        Field::new("models.job_search", &config.models.job_search, &["HIREWIRE_MODEL_JOB_SEARCH"]),
        Field::new("models.crm", &config.models.crm, &["HIREWIRE_MODEL_CRM"]),
        Field::new("models.general", &config.models.general, &["HIREWIRE_MODEL_GENERAL"]),
        Field::new("models.evaluator", &config.models.evaluator, &["HIREWIRE_MODEL_EVALUATOR"]),
        Field::new("models.title", &config.models.title, &["HIREWIRE_MODEL_TITLE"]),
        Field::new("tiers", tiers, &["HIREWIRE_TIERS"]),
        Field::new(
            "evaluator.enabled_by_default",
            config.evaluator.enabled_by_default,
            &["HIREWIRE_EVALUATOR_ENABLED"],
        ),
        Field::new(
            "evaluator.pass_threshold",
            config.evaluator.pass_threshold,
            &["HIREWIRE_EVALUATOR_PASS_THRESHOLD"],
        ),
        Field::new(
            "evaluator.max_retries",
            config.evaluator.max_retries,
            &["HIREWIRE_EVALUATOR_MAX_RETRIES"],
        ),
        Field::new("search.url", &config.search.url, &["HIREWIRE_SEARCH_URL"]),
        Field::new("search.api_key", redact_secret(config.search.api_key.as_ref()), &[
            "HIREWIRE_SEARCH_API_KEY",
        ]),
        Field::new(
            "search.cache_ttl_secs",
            config.search.cache_ttl_secs,
            &["HIREWIRE_SEARCH_CACHE_TTL_SECS"],
        ),
        Field::new(
            "session.history_limit",
            config.session.history_limit,
            &["HIREWIRE_SESSION_HISTORY_LIMIT"],
        ),
        Field::new(
            "session.context_budget_bytes",
            config.session.context_budget_bytes,
            &["HIREWIRE_SESSION_CONTEXT_BUDGET_BYTES"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["HIREWIRE_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port, &["HIREWIRE_SERVER_PORT"]),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["HIREWIRE_LOGGING_LEVEL", "HIREWIRE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["HIREWIRE_LOGGING_FORMAT", "HIREWIRE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("hirewire.toml"), PathBuf::from("config/hirewire.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file(path: &Path) -> Option<ConfigFile> {
    let raw = fs::read_to_string(path).ok()?;
    let doc = raw.parse::<Value>().ok()?;
    Some(ConfigFile { path: path.to_path_buf(), doc })
}

fn field_source(field: &Field, file: Option<&ConfigFile>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    match file {
        Some(file) if contains_path(&file.doc, field.key) => {
            format!("file ({})", file.path.display())
        }
        _ => "default".to_string(),
    }
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

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };

    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
