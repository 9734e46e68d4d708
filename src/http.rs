use crate::config::{SampleConfig, MAX_SAMPLE_MS};
use crate::metrics::Metrics;
use crate::probe::CapabilitySource;
use crate::report::assemble_record;
use crate::stats::StatsRecord;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub caps: Arc<dyn CapabilitySource>,
    pub sample: SampleConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub sample_ms: Option<String>,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    caps: Arc<dyn CapabilitySource>,
    sample: SampleConfig,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/performstat", get(performstat_handler))
        .with_state(HttpAppState {
            metrics,
            caps,
            sample,
        })
}

/// Absent or non-integer values fall back to the default.
pub fn parse_sample_ms(raw: Option<&str>, sample: &SampleConfig) -> i64 {
    let value = raw.and_then(|s| s.trim().parse::<i64>().ok());
    clamp_sample_ms(value, sample)
}

/// Clamps to `[0, max_ms]`, and never past the one second ceiling even when
/// the config was built without validation.
pub fn clamp_sample_ms(value: Option<i64>, sample: &SampleConfig) -> i64 {
    let max = sample.max_ms.min(MAX_SAMPLE_MS) as i64;
    value.unwrap_or(sample.default_ms as i64).clamp(0, max)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn performstat_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<StatsQuery>,
) -> Response {
    state.metrics.inc_request("http");
    let sample_ms = parse_sample_ms(query.sample_ms.as_deref(), &state.sample);

    let caps = state.caps.clone();
    let started = Instant::now();
    let record =
        tokio::task::spawn_blocking(move || assemble_record(caps.as_ref(), sample_ms)).await;

    match record {
        Ok(record) => {
            state.metrics.observe_record(&record, started.elapsed());
            Json::<StatsRecord>(record).into_response()
        }
        Err(err) => {
            error!(error = %err, "stats collection task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("stats collection failed: {err}"),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCapabilities, FakeOs, ManagementScript};
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_with(caps: FakeCapabilities) -> (Router, Arc<Metrics>) {
        let metrics = Metrics::new().expect("metrics init");
        let app = build_router(metrics.clone(), Arc::new(caps), SampleConfig::default());
        (app, metrics)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn sample_ms_defaults_and_clamps() {
        let sample = SampleConfig::default();
        assert_eq!(parse_sample_ms(None, &sample), 100);
        assert_eq!(parse_sample_ms(Some("abc"), &sample), 100);
        assert_eq!(parse_sample_ms(Some("1.5"), &sample), 100);
        assert_eq!(parse_sample_ms(Some("250"), &sample), 250);
        assert_eq!(parse_sample_ms(Some("-20"), &sample), 0);
        assert_eq!(parse_sample_ms(Some("999999"), &sample), 1000);
    }

    #[test]
    fn unvalidated_max_cannot_exceed_one_second() {
        let sample = SampleConfig {
            default_ms: 100,
            max_ms: 10_000,
        };
        assert_eq!(parse_sample_ms(Some("9000"), &sample), 1000);
        assert_eq!(clamp_sample_ms(Some(60_000), &sample), 1000);
        assert_eq!(clamp_sample_ms(None, &SampleConfig::default()), 100);
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (app, _) = app_with(FakeCapabilities::default());
        let (status, body) = get_body(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn performstat_returns_record_json() {
        let (app, metrics) = app_with(FakeCapabilities {
            os: Some(FakeOs::default()),
            management: Some(ManagementScript::default()),
            ..FakeCapabilities::default()
        });
        let (status, body) = get_body(app, "/performstat?sample_ms=oops").await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["memory"]["total"], 16u64 * 1024 * 1024 * 1024);
        assert_eq!(value["gpu"]["provider"], "nvidia_management");
        assert_eq!(value["gpu"]["gpus"], serde_json::json!([]));

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("performstat_requests_total{surface=\"http\"} 1"));
    }

    #[tokio::test]
    async fn performstat_reports_missing_capabilities_as_data() {
        let (app, _) = app_with(FakeCapabilities::default());
        let (status, body) = get_body(app, "/performstat").await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            value["memory"]["error"],
            "sysinfo not available (simulated absence)"
        );
        assert!(value["gpu"]["error"]
            .as_str()
            .unwrap()
            .starts_with("NVML not available"));
    }

    #[tokio::test]
    async fn metrics_contains_uptime() {
        let (app, _) = app_with(FakeCapabilities::default());
        let (status, body) = get_body(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("performstat_uptime_seconds"));
        assert!(body.contains("performstat_scrape_count_total 1"));
    }
}
