//! HTTP handlers.
//!
//! JSON endpoints speak the `{id, type, delta?, value?}` wire form; text
//! endpoints answer with the bare value. Validation happens before any
//! repository access.

use std::fmt::Write as _;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pulse_core::{Metric, MetricKind, MetricQuery, MetricValue, RawMetric};

use crate::ApiState;
use crate::service::ServiceError;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(&self.to_string(), status)
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, msg.to_string()).into_response()
}

/// Unwrap a JSON body; a wrong content type is 415, anything else 400.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection @ JsonRejection::MissingJsonContentType(_)) => Err(error_response(
            &rejection.body_text(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
        )),
        Err(rejection) => Err(error_response(&rejection.body_text(), StatusCode::BAD_REQUEST)),
    }
}

fn parse_kind(raw: &str) -> Result<MetricKind, Response> {
    raw.parse()
        .map_err(|e: pulse_core::MetricError| error_response(&e.to_string(), StatusCode::BAD_REQUEST))
}

// ── Reads ──────────────────────────────────────────────────────

/// GET /
pub async fn list_metrics(State(state): State<ApiState>) -> Response {
    match state.service.list_all().await {
        Ok(metrics) => {
            let mut body = String::new();
            for metric in &metrics {
                let _ = writeln!(body, "{metric}");
            }
            body.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> Response {
    match state.service.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /value/{kind}/{id}
pub async fn get_value(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(rejection) => return rejection,
    };
    match state.service.value(kind, &id).await {
        Ok(metric) => metric.value.to_string().into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /value
pub async fn query_value(
    State(state): State<ApiState>,
    payload: Result<Json<MetricQuery>, JsonRejection>,
) -> Response {
    let query = match json_body(payload) {
        Ok(query) => query,
        Err(rejection) => return rejection,
    };
    let (kind, id) = match query.parse() {
        Ok(parsed) => parsed,
        Err(e) => return ServiceError::from(e).into_response(),
    };
    match state.service.value(kind, id).await {
        Ok(metric) => Json(metric).into_response(),
        Err(e) => e.into_response(),
    }
}

// ── Updates ────────────────────────────────────────────────────

/// POST /update/{kind}/{id}/{value}
pub async fn update_from_path(
    State(state): State<ApiState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(rejection) => return rejection,
    };
    if id.is_empty() {
        return error_response("metric id is required", StatusCode::NOT_FOUND);
    }
    let value = match MetricValue::parse(kind, &value) {
        Ok(value) => value,
        Err(e) => return ServiceError::from(e).into_response(),
    };
    match state.service.update(Metric::new(id, value)).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /update
pub async fn update_json(
    State(state): State<ApiState>,
    payload: Result<Json<RawMetric>, JsonRejection>,
) -> Response {
    let metric = match json_body(payload).map(Metric::try_from) {
        Ok(Ok(metric)) => metric,
        Ok(Err(e)) => return ServiceError::from(e).into_response(),
        Err(rejection) => return rejection,
    };
    match state.service.update(metric).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /updates
pub async fn update_batch(
    State(state): State<ApiState>,
    payload: Result<Json<Vec<RawMetric>>, JsonRejection>,
) -> Response {
    let raw = match json_body(payload) {
        Ok(raw) => raw,
        Err(rejection) => return rejection,
    };
    let metrics = match raw.into_iter().map(Metric::try_from).collect::<Result<Vec<_>, _>>() {
        Ok(metrics) => metrics,
        Err(e) => return ServiceError::from(e).into_response(),
    };
    match state.service.update_batch(metrics).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => e.into_response(),
    }
}
