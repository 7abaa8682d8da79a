use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub daily_analysis_limit: u32,
    pub ip_rate_limit_per_minute: u32,
    pub retention_days: u32,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub model: String,
    /// If empty, analysis requests fail fast with a configuration error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listen: ListenConfig,
    pub limits: LimitsConfig,
    pub upstream: UpstreamConfig,
    /// Unset means the log read endpoints are disabled (503), not open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_api_key: Option<String>,
    /// `sqlite` (default) or `sled`.
    pub storage_backend: String,
    pub database_path: String,
    pub sled_path: String,
    /// `*` or a comma-separated origin list.
    pub allowed_origins: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            listen: ListenConfig {
                host: env_or("LISTEN_HOST", "0.0.0.0"),
                port: env_parse("LISTEN_PORT", 3000),
            },
            limits: LimitsConfig {
                daily_analysis_limit: env_parse("DAILY_ANALYSIS_LIMIT", 3),
                ip_rate_limit_per_minute: env_parse("IP_RATE_LIMIT_PER_MINUTE", 10),
                retention_days: env_parse("RETENTION_DAYS", 7),
                request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 60),
            },
            upstream: UpstreamConfig {
                base_url: env_or(
                    "GEMINI_BASE_URL",
                    "https://generativelanguage.googleapis.com",
                ),
                model: env_or("GEMINI_MODEL", "gemini-2.5-flash-lite-preview-09-2025"),
                api_key: env_or("GEMINI_API_KEY", ""),
            },
            admin_api_key: std::env::var("ADMIN_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            storage_backend: env_or("STORAGE_BACKEND", "sqlite"),
            database_path: env_or("DATABASE_PATH", "data/usage.sqlite"),
            sled_path: env_or("SLED_PATH", "data/sled"),
            allowed_origins: env_or("ALLOWED_ORIGINS", "*"),
        }
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            listen: ListenConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            limits: LimitsConfig {
                daily_analysis_limit: 3,
                ip_rate_limit_per_minute: 10,
                retention_days: 7,
                request_timeout_seconds: 5,
            },
            upstream: UpstreamConfig {
                base_url: String::new(),
                model: "gemini-test".to_string(),
                api_key: "test-key".to_string(),
            },
            admin_api_key: Some("admin-secret".to_string()),
            storage_backend: "sqlite".to_string(),
            database_path: "data/usage.sqlite".to_string(),
            sled_path: "data/sled".to_string(),
            allowed_origins: "*".to_string(),
        }
    }
}
