use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::model::{ModelNode, ModelSelection};
use crate::domain::tier::ModelTier;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub models: ModelsConfig,
    pub tiers: Vec<TierConfig>,
    pub evaluator: EvaluatorConfig,
    pub search: SearchConfig,
    pub session: SessionConfig,
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
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_rounds: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelsConfig {
    pub router: String,
    pub job_search: String,
    pub crm: String,
    pub general: String,
    pub evaluator: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierConfig {
    pub model: String,
    pub first_token_timeout_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluatorConfig {
    pub enabled_by_default: bool,
    pub pass_threshold: u8,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_calls_per_turn: u32,
    pub max_concurrent: usize,
    pub max_results: usize,
    pub cache_ttl_secs: u64,
    pub applied_ttl_secs: u64,
    pub job_boards: Vec<String>,
    pub max_query_exclusions: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub history_limit: u32,
    pub context_budget_bytes: usize,
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
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub search_api_key: Option<String>,
    pub server_port: Option<u16>,
    pub tiers: Option<Vec<TierConfig>>,
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

pub const DEFAULT_JOB_BOARDS: &[&str] = &[
    "linkedin.com",
    "indeed.com",
    "glassdoor.com",
    "ziprecruiter.com",
    "monster.com",
    "careerbuilder.com",
    "simplyhired.com",
    "dice.com",
    "builtin.com",
    "wellfound.com",
];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://hirewire.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: "http://localhost:11434/v1".to_string(),
                timeout_secs: 30,
                max_rounds: 8,
            },
            models: ModelsConfig {
                router: "llama3.1".to_string(),
                job_search: "llama3.1".to_string(),
                crm: "llama3.1".to_string(),
                general: "llama3.1".to_string(),
                evaluator: "llama3.1".to_string(),
                title: "llama3.1".to_string(),
            },
            tiers: Vec::new(),
            evaluator: EvaluatorConfig {
                enabled_by_default: false,
                pass_threshold: 60,
                max_retries: 2,
                timeout_secs: 20,
            },
            search: SearchConfig {
                url: "https://serpapi.com/search.json".to_string(),
                api_key: None,
                timeout_secs: 15,
                max_calls_per_turn: 3,
                max_concurrent: 3,
                max_results: 10,
                cache_ttl_secs: 900,
                applied_ttl_secs: 60,
                job_boards: DEFAULT_JOB_BOARDS.iter().map(|board| board.to_string()).collect(),
                max_query_exclusions: 5,
            },
            session: SessionConfig { history_limit: 20, context_budget_bytes: 12_000 },
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

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
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

impl ModelsConfig {
    pub fn selection(&self) -> ModelSelection {
        let mut selection = ModelSelection::default();
        selection.set(ModelNode::Router, self.router.clone());
        selection.set(ModelNode::JobSearch, self.job_search.clone());
        selection.set(ModelNode::Crm, self.crm.clone());
        selection.set(ModelNode::General, self.general.clone());
        selection.set(ModelNode::Evaluator, self.evaluator.clone());
        selection.set(ModelNode::Title, self.title.clone());
        selection
    }
}

impl TierConfig {
    pub fn to_tier(&self) -> ModelTier {
        ModelTier::new(self.model.clone(), Duration::from_millis(self.first_token_timeout_ms))
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("hirewire.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn tier_chain(&self) -> Vec<ModelTier> {
        self.tiers.iter().map(TierConfig::to_tier).collect()
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

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_rounds) = llm.max_rounds {
                self.llm.max_rounds = max_rounds;
            }
        }

        if let Some(models) = patch.models {
            let slots = [
                (models.router, &mut self.models.router),
                (models.job_search, &mut self.models.job_search),
                (models.crm, &mut self.models.crm),
                (models.general, &mut self.models.general),
                (models.evaluator, &mut self.models.evaluator),
                (models.title, &mut self.models.title),
            ];
            for (value, slot) in slots {
                if let Some(value) = value {
                    *slot = value;
                }
            }
        }

        if let Some(tiers) = patch.tiers {
            self.tiers = tiers;
        }

        if let Some(evaluator) = patch.evaluator {
            if let Some(enabled_by_default) = evaluator.enabled_by_default {
                self.evaluator.enabled_by_default = enabled_by_default;
            }
            if let Some(pass_threshold) = evaluator.pass_threshold {
                self.evaluator.pass_threshold = pass_threshold;
            }
            if let Some(max_retries) = evaluator.max_retries {
                self.evaluator.max_retries = max_retries;
            }
            if let Some(timeout_secs) = evaluator.timeout_secs {
                self.evaluator.timeout_secs = timeout_secs;
            }
        }

        if let Some(search) = patch.search {
            if let Some(url) = search.url {
                self.search.url = url;
            }
            if let Some(search_api_key_value) = search.api_key {
                self.search.api_key = Some(secret_value(search_api_key_value));
            }
            if let Some(timeout_secs) = search.timeout_secs {
                self.search.timeout_secs = timeout_secs;
            }
            if let Some(max_calls_per_turn) = search.max_calls_per_turn {
                self.search.max_calls_per_turn = max_calls_per_turn;
            }
            if let Some(max_concurrent) = search.max_concurrent {
                self.search.max_concurrent = max_concurrent;
            }
            if let Some(max_results) = search.max_results {
                self.search.max_results = max_results;
            }
            if let Some(cache_ttl_secs) = search.cache_ttl_secs {
                self.search.cache_ttl_secs = cache_ttl_secs;
            }
            if let Some(applied_ttl_secs) = search.applied_ttl_secs {
                self.search.applied_ttl_secs = applied_ttl_secs;
            }
            if let Some(job_boards) = search.job_boards {
                self.search.job_boards = job_boards;
            }
            if let Some(max_query_exclusions) = search.max_query_exclusions {
                self.search.max_query_exclusions = max_query_exclusions;
            }
        }

        if let Some(session) = patch.session {
            if let Some(history_limit) = session.history_limit {
                self.session.history_limit = history_limit;
            }
            if let Some(context_budget_bytes) = session.context_budget_bytes {
                self.session.context_budget_bytes = context_budget_bytes;
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
        if let Some(value) = read_env("HIREWIRE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("HIREWIRE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_value("HIREWIRE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_value("HIREWIRE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HIREWIRE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("HIREWIRE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HIREWIRE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("HIREWIRE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_value("HIREWIRE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_LLM_MAX_ROUNDS") {
            self.llm.max_rounds = parse_value("HIREWIRE_LLM_MAX_ROUNDS", &value)?;
        }

        let model_vars = [
            ("HIREWIRE_MODEL_ROUTER", &mut self.models.router),
            ("HIREWIRE_MODEL_JOB_SEARCH", &mut self.models.job_search),
            ("HIREWIRE_MODEL_CRM", &mut self.models.crm),
            ("HIREWIRE_MODEL_GENERAL", &mut self.models.general),
            ("HIREWIRE_MODEL_EVALUATOR", &mut self.models.evaluator),
            ("HIREWIRE_MODEL_TITLE", &mut self.models.title),
        ];
        for (key, slot) in model_vars {
            if let Some(value) = read_env(key) {
                *slot = value;
            }
        }

        if let Some(value) = read_env("HIREWIRE_TIERS") {
            self.tiers = parse_tiers("HIREWIRE_TIERS", &value)?;
        }

        if let Some(value) = read_env("HIREWIRE_EVALUATOR_ENABLED") {
            self.evaluator.enabled_by_default = parse_value("HIREWIRE_EVALUATOR_ENABLED", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_EVALUATOR_PASS_THRESHOLD") {
            self.evaluator.pass_threshold =
                parse_value("HIREWIRE_EVALUATOR_PASS_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_EVALUATOR_MAX_RETRIES") {
            self.evaluator.max_retries = parse_value("HIREWIRE_EVALUATOR_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_EVALUATOR_TIMEOUT_SECS") {
            self.evaluator.timeout_secs = parse_value("HIREWIRE_EVALUATOR_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HIREWIRE_SEARCH_URL") {
            self.search.url = value;
        }
        if let Some(value) = read_env("HIREWIRE_SEARCH_API_KEY") {
            self.search.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HIREWIRE_SEARCH_TIMEOUT_SECS") {
            self.search.timeout_secs = parse_value("HIREWIRE_SEARCH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_SEARCH_CACHE_TTL_SECS") {
            self.search.cache_ttl_secs = parse_value("HIREWIRE_SEARCH_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_SEARCH_APPLIED_TTL_SECS") {
            self.search.applied_ttl_secs =
                parse_value("HIREWIRE_SEARCH_APPLIED_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("HIREWIRE_SESSION_HISTORY_LIMIT") {
            self.session.history_limit = parse_value("HIREWIRE_SESSION_HISTORY_LIMIT", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_SESSION_CONTEXT_BUDGET_BYTES") {
            self.session.context_budget_bytes =
                parse_value("HIREWIRE_SESSION_CONTEXT_BUDGET_BYTES", &value)?;
        }

        if let Some(value) = read_env("HIREWIRE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("HIREWIRE_SERVER_PORT") {
            self.server.port = parse_value("HIREWIRE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("HIREWIRE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_value("HIREWIRE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("HIREWIRE_LOGGING_LEVEL").or_else(|| read_env("HIREWIRE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HIREWIRE_LOGGING_FORMAT").or_else(|| read_env("HIREWIRE_LOG_FORMAT"));
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
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(search_api_key) = overrides.search_api_key {
            self.search.api_key = Some(secret_value(search_api_key));
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(tiers) = overrides.tiers {
            self.tiers = tiers;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_models(&self.models)?;
        validate_tiers(&self.tiers)?;
        validate_evaluator(&self.evaluator)?;
        validate_search(&self.search)?;
        validate_session(&self.session)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("hirewire.toml"), PathBuf::from("config/hirewire.toml")]
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

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

/// Parses `model:ms,model:ms`. The timeout is split off the last colon so
/// model names such as `llama3.1:8b` survive.
fn parse_tiers(key: &str, value: &str) -> Result<Vec<TierConfig>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid =
                || ConfigError::InvalidEnvOverride { key: key.to_string(), value: entry.to_string() };
            let (model, timeout) = entry.rsplit_once(':').ok_or_else(invalid)?;
            let first_token_timeout_ms = timeout.trim().parse::<u64>().map_err(|_| invalid())?;
            Ok(TierConfig { model: model.trim().to_string(), first_token_timeout_ms })
        })
        .collect()
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_rounds == 0 {
        return Err(ConfigError::Validation(
            "llm.max_rounds must be greater than zero".to_string(),
        ));
    }

    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.provider == LlmProvider::OpenAi {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the openai provider".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_models(models: &ModelsConfig) -> Result<(), ConfigError> {
    let entries = [
        ("models.router", &models.router),
        ("models.job_search", &models.job_search),
        ("models.crm", &models.crm),
        ("models.general", &models.general),
        ("models.evaluator", &models.evaluator),
        ("models.title", &models.title),
    ];

    for (key, value) in entries {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{key} must not be empty")));
        }
    }

    Ok(())
}

fn validate_tiers(tiers: &[TierConfig]) -> Result<(), ConfigError> {
    for (index, tier) in tiers.iter().enumerate() {
        if tier.model.trim().is_empty() {
            return Err(ConfigError::Validation(format!("tiers[{index}].model must not be empty")));
        }
        if tier.first_token_timeout_ms == 0 || tier.first_token_timeout_ms > 120_000 {
            return Err(ConfigError::Validation(format!(
                "tiers[{index}].first_token_timeout_ms must be in range 1..=120000"
            )));
        }
    }

    Ok(())
}

fn validate_evaluator(evaluator: &EvaluatorConfig) -> Result<(), ConfigError> {
    if evaluator.pass_threshold > 100 {
        return Err(ConfigError::Validation(
            "evaluator.pass_threshold must be in range 0..=100".to_string(),
        ));
    }

    if evaluator.timeout_secs == 0 || evaluator.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "evaluator.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if !search.url.starts_with("http://") && !search.url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "search.url must start with http:// or https://".to_string(),
        ));
    }

    if search.timeout_secs == 0 || search.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "search.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if search.max_calls_per_turn == 0 || search.max_concurrent == 0 {
        return Err(ConfigError::Validation(
            "search.max_calls_per_turn and search.max_concurrent must be greater than zero"
                .to_string(),
        ));
    }

    if search.max_results == 0 || search.max_results > 50 {
        return Err(ConfigError::Validation(
            "search.max_results must be in range 1..=50".to_string(),
        ));
    }

    if search.job_boards.iter().any(|board| board.trim().is_empty() || board.contains(' ')) {
        return Err(ConfigError::Validation(
            "search.job_boards entries must be bare domains such as `indeed.com`".to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.context_budget_bytes == 0 {
        return Err(ConfigError::Validation(
            "session.context_budget_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    models: Option<ModelsPatch>,
    tiers: Option<Vec<TierConfig>>,
    evaluator: Option<EvaluatorPatch>,
    search: Option<SearchPatch>,
    session: Option<SessionPatch>,
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
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_rounds: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelsPatch {
    router: Option<String>,
    job_search: Option<String>,
    crm: Option<String>,
    general: Option<String>,
    evaluator: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EvaluatorPatch {
    enabled_by_default: Option<bool>,
    pass_threshold: Option<u8>,
    max_retries: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    max_calls_per_turn: Option<u32>,
    max_concurrent: Option<usize>,
    max_results: Option<usize>,
    cache_ttl_secs: Option<u64>,
    applied_ttl_secs: Option<u64>,
    job_boards: Option<Vec<String>>,
    max_query_exclusions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    history_limit: Option<u32>,
    context_budget_bytes: Option<usize>,
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
