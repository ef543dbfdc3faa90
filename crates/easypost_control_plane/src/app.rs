use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use easypost_contract::JobKind;
use easypost_storage::{EasypostStorage, JobRecord};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::jobs::JobQueue;

#[derive(Clone)]
pub struct AppState {
    pub storage: EasypostStorage,
    pub queue: JobQueue,
    pub auth_token: Option<String>,
    pub require_bearer: bool,
}

impl AppState {
    pub fn new(
        storage: EasypostStorage,
        queue: JobQueue,
        auth_token: Option<String>,
        require_bearer: bool,
    ) -> Self {
        Self {
            storage,
            queue,
            auth_token,
            require_bearer,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(health_live))
        .route("/webhooks/easypost", post(receive_webhook))
        .route("/v1/jobs/refund-statuses", post(post_refund_poll_job))
        .route("/v1/jobs/{job_id}", get(get_job))
        .route("/v1/jobs/{job_id}/result", get(get_job_result))
        .route("/v1/labels/{label_id}/formats", post(post_label_formats_job))
        .with_state(state)
}

async fn health_live() -> impl IntoResponse {
    Json(json!({
        "status": "live",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// Provider webhook deliveries. The body is queued untouched and parsed by the
/// worker; the provider always gets an empty 200 once the job row exists.
async fn receive_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let job = state
        .queue
        .enqueue(JobKind::process_webhook(&body))
        .await
        .map_err(internal_error)?;
    info!(job_id = %job.job_id, bytes = body.len(), "webhook received");
    Ok(StatusCode::OK)
}

async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let job = state.storage.get_job(&job_id).await.map_err(internal_error)?;
    match job {
        Some(record) => Ok((StatusCode::OK, Json(record))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error":"job_not_found"})),
        )),
    }
}

async fn get_job_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let result = state
        .storage
        .get_job_result(&job_id)
        .await
        .map_err(internal_error)?;
    match result {
        Some(record) => Ok((StatusCode::OK, Json(record))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error":"job_result_not_found"})),
        )),
    }
}

async fn post_refund_poll_job(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let job = state
        .queue
        .enqueue(JobKind::UpdateRefundStatuses)
        .await
        .map_err(internal_error)?;
    Ok(accepted(job))
}

async fn post_label_formats_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(label_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let label = state
        .storage
        .get_label(&label_id)
        .await
        .map_err(internal_error)?;
    if label.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error":"label_not_found"})),
        ));
    }
    let job = state
        .queue
        .enqueue(JobKind::backfill_label_formats(label_id))
        .await
        .map_err(internal_error)?;
    Ok(accepted(job))
}

fn accepted(job: JobRecord) -> (StatusCode, Json<Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job.job_id,
            "submitted_at": job.submitted_at,
            "status_url": format!("/v1/jobs/{}", job.job_id)
        })),
    )
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    if !state.require_bearer {
        return Ok(());
    }
    let token = state.auth_token.as_deref().ok_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error":"auth_token_required_but_not_configured"})),
        )
    })?;
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let expected = format!("Bearer {token}");
    if provided == expected {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"invalid_or_missing_bearer_token"})),
        ))
    }
}

fn internal_error(error: anyhow::Error) -> (StatusCode, Json<Value>) {
    error!(error = %error, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error", "detail": error.to_string() })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use easypost_contract::JobStatus;
    use easypost_storage::StorageConfig;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_state(require_bearer: bool) -> (AppState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let storage = EasypostStorage::connect(&StorageConfig::new(path.display().to_string()))
            .await
            .unwrap();
        let (queue, receiver) = JobQueue::new(storage.clone());
        // No worker in these tests; jobs stay queued.
        drop(receiver);
        let state = AppState::new(
            storage,
            queue,
            Some("s3cret".to_string()),
            require_bearer,
        );
        (state, dir)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn webhook_post_returns_empty_200_and_queues_job() {
        let (state, _dir) = test_state(true).await;
        let storage = state.storage.clone();
        let app = build_router(state);
        let payload = br#"{"description":"tracker.updated","result":{}}"#;

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/easypost")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_vec()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());

        let pending = storage.list_pending_jobs().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, "process_webhook");
        assert_eq!(pending[0].job_status().unwrap(), JobStatus::Queued);
        let JobKind::ProcessWebhook { payload_base64 } = pending[0].kind().unwrap() else {
            panic!("unexpected job kind");
        };
        assert_eq!(JobKind::decode_payload(&payload_base64).unwrap(), payload);
    }

    #[tokio::test]
    async fn webhook_get_is_method_not_allowed() {
        let (state, _dir) = test_state(false).await;
        let storage = state.storage.clone();
        let app = build_router(state);

        let request = Request::builder()
            .uri("/webhooks/easypost")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(storage.list_pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_is_live() {
        let (state, _dir) = test_state(true).await;
        let app = build_router(state);

        let request = Request::builder()
            .uri("/health/live")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "live");
    }

    #[tokio::test]
    async fn operator_endpoints_require_bearer_token() {
        let (state, _dir) = test_state(true).await;
        let app = build_router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/v1/jobs/refund-statuses")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("POST")
            .uri("/v1/jobs/refund-statuses")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job_id = body_json(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let request = Request::builder()
            .uri(format!("/v1/jobs/{job_id}"))
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await;
        assert_eq!(job["operation"], "update_refund_statuses");
        assert_eq!(job["status"], "queued");
    }

    #[tokio::test]
    async fn unknown_job_and_label_are_404() {
        let (state, _dir) = test_state(false).await;
        let app = build_router(state);

        let request = Request::builder()
            .uri("/v1/jobs/missing/result")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method("POST")
            .uri("/v1/labels/missing/formats")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "label_not_found");
    }
}
