//! Runtime configuration, constructed once at startup and passed into
//! services explicitly.

use std::path::PathBuf;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub bind_addr: String,
    pub database_url: String,
    pub ingestion_storage_dir: PathBuf,
    pub default_currency: String,

    pub enable_llm_extraction: bool,
    pub llm_api_key: Option<String>,
    pub llm_api_url: Option<String>,
    pub vision_api_url: Option<String>,
    pub embedding_api_url: Option<String>,
    pub embedding_similarity_threshold: f32,
    pub embedding_candidate_limit: usize,
    pub pdf_min_text_chars: usize,

    pub whatsapp_ingest_token: Option<String>,
    pub whatsapp_ingest_hmac_secret: Option<String>,
    pub whatsapp_ingest_signature_ttl_seconds: u64,
    pub whatsapp_ingest_rate_limit_per_minute: u32,
    pub whatsapp_ingest_rate_limit_burst: u32,
    pub whatsapp_content_hash_window_hours: i64,
    pub whatsapp_extract_debounce_seconds: u64,

    pub admin_username: Option<String>,
    pub admin_password: Option<String>,

    pub worker_parallelism: usize,
    pub shutdown_grace_seconds: u64,
    pub job_reconcile_after_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "local".into(),
            bind_addr: "0.0.0.0:8092".into(),
            database_url: "pricebot.db".into(),
            ingestion_storage_dir: PathBuf::from("./data/ingestion"),
            default_currency: "USD".into(),
            enable_llm_extraction: false,
            llm_api_key: None,
            llm_api_url: None,
            vision_api_url: None,
            embedding_api_url: None,
            embedding_similarity_threshold: 0.86,
            embedding_candidate_limit: 50,
            pdf_min_text_chars: 200,
            whatsapp_ingest_token: None,
            whatsapp_ingest_hmac_secret: None,
            whatsapp_ingest_signature_ttl_seconds: 300,
            whatsapp_ingest_rate_limit_per_minute: 120,
            whatsapp_ingest_rate_limit_burst: 30,
            whatsapp_content_hash_window_hours: 24,
            whatsapp_extract_debounce_seconds: 5,
            admin_username: None,
            admin_password: None,
            worker_parallelism: default_parallelism(),
            shutdown_grace_seconds: 30,
            job_reconcile_after_minutes: 15,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            environment: env_string("ENVIRONMENT", &defaults.environment),
            bind_addr: env_string("BIND", &defaults.bind_addr),
            database_url: env_string("DATABASE_URL", &defaults.database_url),
            ingestion_storage_dir: env_opt("INGESTION_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.ingestion_storage_dir),
            default_currency: env_string("DEFAULT_CURRENCY", &defaults.default_currency)
                .to_ascii_uppercase(),
            enable_llm_extraction: env_bool("ENABLE_LLM_EXTRACTION", false),
            llm_api_key: env_opt("LLM_API_KEY"),
            llm_api_url: env_opt("LLM_API_URL"),
            vision_api_url: env_opt("VISION_API_URL"),
            embedding_api_url: env_opt("EMBEDDING_API_URL"),
            embedding_similarity_threshold: env_parse(
                "EMBEDDING_SIMILARITY_THRESHOLD",
                defaults.embedding_similarity_threshold,
            ),
            embedding_candidate_limit: env_parse(
                "EMBEDDING_CANDIDATE_LIMIT",
                defaults.embedding_candidate_limit,
            ),
            pdf_min_text_chars: env_parse("PDF_MIN_TEXT_CHARS", defaults.pdf_min_text_chars),
            whatsapp_ingest_token: env_opt("WHATSAPP_INGEST_TOKEN"),
            whatsapp_ingest_hmac_secret: env_opt("WHATSAPP_INGEST_HMAC_SECRET"),
            whatsapp_ingest_signature_ttl_seconds: env_parse(
                "WHATSAPP_INGEST_SIGNATURE_TTL_SECONDS",
                defaults.whatsapp_ingest_signature_ttl_seconds,
            ),
            whatsapp_ingest_rate_limit_per_minute: env_parse(
                "WHATSAPP_INGEST_RATE_LIMIT_PER_MINUTE",
                defaults.whatsapp_ingest_rate_limit_per_minute,
            ),
            whatsapp_ingest_rate_limit_burst: env_parse(
                "WHATSAPP_INGEST_RATE_LIMIT_BURST",
                defaults.whatsapp_ingest_rate_limit_burst,
            ),
            whatsapp_content_hash_window_hours: env_parse(
                "WHATSAPP_CONTENT_HASH_WINDOW_HOURS",
                defaults.whatsapp_content_hash_window_hours,
            ),
            whatsapp_extract_debounce_seconds: env_parse(
                "WHATSAPP_EXTRACT_DEBOUNCE_SECONDS",
                defaults.whatsapp_extract_debounce_seconds,
            ),
            admin_username: env_opt("ADMIN_USERNAME"),
            admin_password: env_opt("ADMIN_PASSWORD"),
            worker_parallelism: env_parse("WORKER_PARALLELISM", defaults.worker_parallelism)
                .max(1),
            shutdown_grace_seconds: env_parse(
                "SHUTDOWN_GRACE_SECONDS",
                defaults.shutdown_grace_seconds,
            ),
            job_reconcile_after_minutes: env_parse(
                "JOB_RECONCILE_AFTER_MINUTES",
                defaults.job_reconcile_after_minutes,
            ),
        }
    }

    /// Basic auth over operator routes is active only outside the local
    /// environment and when both credentials are set.
    pub fn admin_auth_enabled(&self) -> bool {
        self.environment != "local"
            && self.admin_username.is_some()
            && self.admin_password.is_some()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Filesystem path behind `database_url`; accepts a plain path or a
    /// `sqlite://` URL.
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite://")
            .unwrap_or(&self.database_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default_currency, "USD");
        assert_eq!(cfg.whatsapp_ingest_signature_ttl_seconds, 300);
        assert_eq!(cfg.whatsapp_content_hash_window_hours, 24);
        assert_eq!(cfg.embedding_similarity_threshold, 0.86);
        assert_eq!(cfg.embedding_candidate_limit, 50);
        assert_eq!(cfg.pdf_min_text_chars, 200);
        assert!(!cfg.enable_llm_extraction);
    }

    #[test]
    fn admin_auth_disabled_in_local_env() {
        let mut cfg = Config {
            admin_username: Some("ops".into()),
            admin_password: Some("secret".into()),
            ..Config::default()
        };
        assert!(!cfg.admin_auth_enabled());
        cfg.environment = "production".into();
        assert!(cfg.admin_auth_enabled());
    }

    #[test]
    fn database_path_strips_url_scheme() {
        let cfg = Config {
            database_url: "sqlite:///var/lib/pricebot.db".into(),
            ..Config::default()
        };
        assert_eq!(cfg.database_path(), "/var/lib/pricebot.db");
    }
}
