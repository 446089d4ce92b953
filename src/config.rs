//! config.rs — process configuration from environment variables.
//!
//! Every knob has a deployment-matching default so a local run against
//! stock Redis/Postgres needs no configuration at all. `.env` files are
//! honored via dotenvy in the binary entrypoint.

use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    // Database
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_pool_min_size: u32,
    pub db_pool_max_size: u32,

    // Queue
    pub redis_url: String,
    pub stream_name: String,
    pub consumer_group: String,
    pub consumer_name: String,

    // Evaluation
    pub batch_size: usize,
    pub block_timeout_ms: u64,
    pub max_retries: u32,
    pub content_prefix_chars: usize,

    // Model gateway
    pub llm_model: String,
    pub llm_api_key: String,
    pub llm_base_url: String,

    // Metrics exporter bind address, e.g. "0.0.0.0:9187". Empty disables it.
    pub metrics_addr: Option<String>,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            db_host: var_or("DB_HOST", "localhost"),
            db_port: parse_or("DB_PORT", 5432),
            db_user: var_or("DB_USER", "junkfilter"),
            db_password: var_or("DB_PASSWORD", "junkfilter123"),
            db_name: var_or("DB_NAME", "junkfilter"),
            db_pool_min_size: parse_or("DB_POOL_MIN_SIZE", 5),
            db_pool_max_size: parse_or("DB_POOL_MAX_SIZE", 20),

            redis_url: var_or("REDIS_URL", "redis://localhost:6379/0"),
            stream_name: var_or("STREAM_NAME", "ingestion_queue"),
            consumer_group: var_or("CONSUMER_GROUP", "evaluators"),
            consumer_name: var_or("CONSUMER_NAME", "evaluator-1"),

            batch_size: parse_or("BATCH_SIZE", 10).max(1),
            block_timeout_ms: parse_or("BLOCK_TIMEOUT_MS", 1000),
            max_retries: parse_or("MAX_RETRIES", 2),
            content_prefix_chars: parse_or("CONTENT_PREFIX_CHARS", 3000),

            llm_model: var_or("LLM_MODEL", "gpt-4o-mini"),
            llm_api_key: var_or("OPENAI_API_KEY", ""),
            llm_base_url: var_or("LLM_BASE_URL", "https://api.openai.com/v1"),

            metrics_addr: env::var("METRICS_ADDR").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Postgres DSN assembled from the individual parts.
    pub fn database_url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}
