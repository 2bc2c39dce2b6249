use axum::Json;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use mockyard_protocol::protocol::{
    ConfigInfo, DeleteResponse, HealthResponse, InstanceStatus, StartRequest, StartResponse,
    StopRequest, StopResponse, UPLOAD_FIELD, UploadResponse,
};
use tracing::debug;

use super::{ApiError, AppState};

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

const NO_FILE: &str = "No file uploaded";

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::new(err.status(), err.body_text())
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

pub(super) async fn start(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ApiResult<StartResponse> {
    let Json(request) = payload.map_err(json_rejection)?;

    let started = state
        .registry
        .start(request.port.value(), &request.config_file)
        .await
        .map_err(|e| state.error(e))?;

    Ok(Json(StartResponse {
        success: true,
        port: started.port,
        config_file: started.config.to_string(),
        message: format!("Mock server started on port {}", started.port),
    }))
}

pub(super) async fn stop(
    State(state): State<AppState>,
    payload: Result<Json<StopRequest>, JsonRejection>,
) -> ApiResult<StopResponse> {
    let Json(request) = payload.map_err(json_rejection)?;

    let stopped = state
        .registry
        .stop(request.port.value())
        .await
        .map_err(|e| state.error(e))?;

    Ok(Json(StopResponse {
        success: true,
        port: stopped.port,
        message: format!("Mock server on port {} stopped", stopped.port),
    }))
}

pub(super) async fn status(State(state): State<AppState>) -> Json<Vec<InstanceStatus>> {
    Json(
        state
            .registry
            .status()
            .iter()
            .map(|instance| instance.to_status())
            .collect(),
    )
}

/// Accepts one file in the `config` field of a multipart form. The file is
/// streamed to a staging file chunk by chunk; other fields are ignored.
pub(super) async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<UploadResponse> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            return Err(ApiError::bad_request(NO_FILE));
        };
        let content_type = field.content_type().map(str::to_string);

        let mut staged = state
            .store
            .begin_upload(&file_name, content_type.as_deref())
            .map_err(|e| state.error(e))?;

        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            staged.write_chunk(&chunk).map_err(|e| state.error(e))?;
        }

        let stored = staged.commit().map_err(|e| state.error(e))?;
        return Ok(Json(UploadResponse {
            success: true,
            filename: stored.name.to_string(),
            message: "Configuration file uploaded successfully".to_string(),
        }));
    }

    Err(ApiError::bad_request(NO_FILE))
}

pub(super) async fn list_configs(State(state): State<AppState>) -> ApiResult<Vec<ConfigInfo>> {
    let configs = state
        .store
        .list(&*state.registry)
        .map_err(|e| state.error(e))?;
    Ok(Json(configs.iter().map(|c| c.to_info()).collect()))
}

pub(super) async fn delete_config(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<DeleteResponse> {
    let name = state
        .store
        .delete(&filename, &*state.registry)
        .map_err(|e| state.error(e))?;

    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Configuration {} deleted successfully", name),
    }))
}

pub(super) async fn download_config(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<serde_json::Value> {
    let document = state.store.download(&filename).map_err(|e| state.error(e))?;
    Ok(Json(document))
}

pub(super) async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}
