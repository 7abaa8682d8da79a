use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Json, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::device::DeviceId;
use crate::filter::{filter_input, filter_output};
use crate::ip_limit::IpRateLimiter;
use crate::prompts::{
    analysis_prompt, error_template, system_prompt, tones_payload, ErrorKey, Language, Tone,
};
use crate::store::{today_kst, unix_ms, NewLogEntry, UsageStore};
use crate::upstream::{
    extract_candidate_text, parse_result_json, upstream_error_detail, UpstreamClient,
};

const ADMIN_KEY_HEADER: &str = "x-admin-key";
const IP_RETRY_AFTER_SECONDS: u64 = 60;

/// Everything a request handler needs, built once at startup and injected
/// through axum state. No module-level globals; teardown is dropping this.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AppConfig>,
    pub store: Arc<dyn UsageStore>,
    pub ip_limiter: Arc<IpRateLimiter>,
    pub upstream: UpstreamClient,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tones", get(tones))
        .route("/api/usage/:device_id", get(usage))
        .route("/api/analyze", post(analyze))
        .route("/api/logs", get(logs))
        .route("/api/logs/stats", get(logs_stats))
        .layer(cors_layer(&state.cfg.allowed_origins))
        .with_state(state)
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let cfg = state.cfg.clone();
    let addr: SocketAddr = format!("{}:{}", cfg.listen.host, cfg.listen.port).parse()?;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let trimmed = allowed_origins.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = trimmed
        .split(',')
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Prefers the first `x-forwarded-for` hop (deployments sit behind a reverse
/// proxy), falling back to the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
}

fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"message": message, "type": kind}})),
    )
        .into_response()
}

fn localized_error(status: StatusCode, kind: &str, lang: Language, key: ErrorKey) -> Response {
    error_response(status, kind, error_template(lang, key))
}

fn save_log_best_effort(store: &Arc<dyn UsageStore>, entry: NewLogEntry) {
    // Log persistence must never change the client-visible outcome.
    if let Err(e) = store.save_analysis_log(&entry) {
        log::warn!("analysis log write failed: {e}");
    }
}

async fn health() -> impl IntoResponse {
    // Liveness only; deliberately says nothing about configured secrets.
    Json(json!({"status": "ok"}))
}

async fn tones() -> impl IntoResponse {
    Json(tones_payload())
}

async fn usage(State(st): State<AppState>, Path(device_id): Path<String>) -> Response {
    let device = match DeviceId::parse(&device_id) {
        Ok(d) => d,
        Err(_) => {
            return localized_error(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                Language::Ko,
                ErrorKey::DeviceIdRequired,
            )
        }
    };
    let count = match st.store.get_usage_count(device.as_str()) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("usage lookup failed: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "usage lookup failed",
            );
        }
    };
    let limit = st.cfg.limits.daily_analysis_limit;
    Json(json!({
        "device_id": device.as_str(),
        "date": today_kst(),
        "count": count,
        "limit": limit,
        "remaining": limit.saturating_sub(count),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub data: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    pub device_id: String,
}

fn default_language() -> String {
    "ko".to_string()
}

fn default_tone() -> String {
    "gentle".to_string()
}

async fn analyze(
    State(st): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Response {
    let lang = Language::from_str(&req.language);
    let tone = Tone::from_str(&req.tone);

    // 1. IP gate. Pure abuse filter; rejected bursts never touch storage.
    let ip = client_ip(&headers, peer);
    if !st.ip_limiter.check_and_record(ip, unix_ms()) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": {
                    "message": error_template(lang, ErrorKey::IpRateLimit),
                    "type": "rate_limited",
                    "retry_after_seconds": IP_RETRY_AFTER_SECONDS,
                }
            })),
        )
            .into_response();
    }

    // 2. Device identity. Invalid ids never reach quota checks.
    let device = match DeviceId::parse(&req.device_id) {
        Ok(d) => d,
        Err(_) => {
            return localized_error(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                lang,
                ErrorKey::DeviceIdRequired,
            )
        }
    };

    let limit = st.cfg.limits.daily_analysis_limit;
    let log_entry = |status: u16, response: Option<String>, error: Option<String>| NewLogEntry {
        device_id: device.as_str().to_string(),
        language: lang.as_str().to_string(),
        tone: tone.as_str().to_string(),
        request_data: req.data.clone(),
        response_data: response,
        status_code: status,
        error_message: error,
    };

    // 3. Daily quota. The one rejection that still writes an audit row: it is
    // an analysis-capacity decision, unlike the abuse gates above.
    let current = match st.store.get_usage_count(device.as_str()) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("quota read failed: {e}");
            return localized_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                lang,
                ErrorKey::UpstreamError,
            );
        }
    };
    if current >= limit {
        save_log_best_effort(
            &st.store,
            log_entry(
                429,
                None,
                Some(format!("Rate limit exceeded: {current}/{limit}")),
            ),
        );
        let message = error_template(lang, ErrorKey::RateLimit)
            .replace("{count}", &current.to_string())
            .replace("{limit}", &limit.to_string());
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", &message);
    }

    // 4. Deployment sanity. A missing key fails every request identically,
    // so there is nothing worth auditing per-request.
    if st.cfg.upstream.api_key.trim().is_empty() {
        return localized_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "configuration_error",
            lang,
            ErrorKey::ApiKeyMissing,
        );
    }

    // 5-6. Input filtering, then prompt assembly.
    let filtered_data = filter_input(&req.data);
    let system = system_prompt(lang, tone);
    let analysis = analysis_prompt(lang, tone, &filtered_data);

    // 7. Single upstream call; detail goes to the audit log, never the client.
    let upstream_result = st
        .upstream
        .generate(
            &st.cfg.upstream.base_url,
            &st.cfg.upstream.model,
            &st.cfg.upstream.api_key,
            &system,
            &analysis,
            st.cfg.limits.request_timeout_seconds,
        )
        .await;

    let body = match upstream_result {
        Ok((status, body)) if (200..300).contains(&status) => body,
        Ok((status, body)) => {
            let detail = upstream_error_detail(&body);
            save_log_best_effort(
                &st.store,
                log_entry(status, None, Some(format!("upstream error: {detail}"))),
            );
            return localized_error(
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                lang,
                ErrorKey::UpstreamError,
            );
        }
        Err(e) => {
            save_log_best_effort(
                &st.store,
                log_entry(503, None, Some(format!("network error: {e}"))),
            );
            return localized_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream_error",
                lang,
                ErrorKey::NetworkError,
            );
        }
    };

    // 8. Response parsing: direct JSON, else the first balanced object span.
    let Some(text) = extract_candidate_text(&body) else {
        save_log_best_effort(
            &st.store,
            log_entry(500, None, Some("empty completion".to_string())),
        );
        return localized_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "parse_error",
            lang,
            ErrorKey::ParseError,
        );
    };
    let Some(mut result) = parse_result_json(text) else {
        // Keep the raw completion for diagnosis.
        save_log_best_effort(
            &st.store,
            log_entry(
                500,
                Some(text.to_string()),
                Some("JSON parse error".to_string()),
            ),
        );
        return localized_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "parse_error",
            lang,
            ErrorKey::ParseError,
        );
    };

    // 9. Output filtering.
    filter_output(&mut result);

    // 10. Quota commit. Only a fully successful, parsed, filtered result
    // consumes an analysis; every failure path above left the counter alone.
    let new_count = match st.store.increment_usage(device.as_str()) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("quota commit failed: {e}");
            return localized_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                lang,
                ErrorKey::UpstreamError,
            );
        }
    };
    if let Some(obj) = result.as_object_mut() {
        // Tolerate partial schema compliance from the model.
        obj.entry("spendingPlan")
            .or_insert_with(|| Value::String(String::new()));
        obj.insert(
            "remainingAnalyses".to_string(),
            Value::from(limit.saturating_sub(new_count)),
        );
    }

    // 11. Success audit row, then the enriched result.
    save_log_best_effort(
        &st.store,
        log_entry(200, Some(result.to_string()), None),
    );
    let response = (StatusCode::OK, Json(result)).into_response();

    // 12. Best-effort housekeeping, off the response path.
    let store = st.store.clone();
    let retention = st.cfg.limits.retention_days;
    tokio::task::spawn_blocking(move || {
        if let Err(e) = store.cleanup_old_data(retention) {
            log::warn!("retention cleanup failed: {e}");
        }
    });

    response
}

/// Fails closed: a deployment without an admin key has no log read path at
/// all, which is different from merely unauthenticated.
fn require_admin_key(st: &AppState, headers: &HeaderMap) -> Option<Response> {
    let Some(expected) = st.cfg.admin_api_key.as_deref() else {
        return Some(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "admin_disabled",
            "admin interface is not configured",
        ));
    };
    let presented = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented != expected {
        return Some(error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid admin key",
        ));
    }
    None
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: u32,
    pub device_id: Option<String>,
}

fn default_log_limit() -> u32 {
    50
}

async fn logs(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LogsQuery>,
) -> Response {
    if let Some(resp) = require_admin_key(&st, &headers) {
        return resp;
    }
    match st.store.get_logs(q.limit, q.device_id.as_deref()) {
        Ok(rows) => Json(json!({"count": rows.len(), "logs": rows})).into_response(),
        Err(e) => {
            log::warn!("log query failed: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "log query failed",
            )
        }
    }
}

async fn logs_stats(State(st): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(resp) = require_admin_key(&st, &headers) {
        return resp;
    }
    match st.store.get_logs_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            log::warn!("log stats failed: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "log stats failed",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            client_ip(&headers, peer),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );

        let empty = HeaderMap::new();
        assert_eq!(client_ip(&empty, peer), "10.0.0.9".parse::<IpAddr>().unwrap());

        let mut bad = HeaderMap::new();
        bad.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&bad, peer), "10.0.0.9".parse::<IpAddr>().unwrap());
    }
}
