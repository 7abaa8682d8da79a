use std::sync::Arc;

use budget_ai_proxy::config::AppConfig;
use budget_ai_proxy::gateway::{serve, AppState};
use budget_ai_proxy::ip_limit::IpRateLimiter;
use budget_ai_proxy::store::open_store;
use budget_ai_proxy::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AppConfig::from_env();
    if cfg.upstream.api_key.is_empty() {
        log::warn!("GEMINI_API_KEY is not set; analysis requests will fail");
    }
    if cfg.admin_api_key.is_none() {
        log::warn!("ADMIN_API_KEY is not set; log endpoints are disabled");
    }

    let store = open_store(&cfg)?;
    log::info!("storage backend: {}", cfg.storage_backend);

    // One cleanup pass at boot so a long-idle deployment doesn't serve its
    // first request on top of weeks of stale rows.
    if let Err(e) = store.cleanup_old_data(cfg.limits.retention_days) {
        log::warn!("startup retention cleanup failed: {e}");
    }

    let state = AppState {
        ip_limiter: Arc::new(IpRateLimiter::new(cfg.limits.ip_rate_limit_per_minute)),
        upstream: UpstreamClient::new(),
        store,
        cfg: Arc::new(cfg),
    };

    tokio::select! {
        r = serve(state) => r,
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutting down");
            Ok(())
        }
    }
}
