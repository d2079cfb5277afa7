//! HTTP surface for download runs and credential provisioning.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::DownloadError;
use crate::orchestrator::{DownloadManifest, DownloadRequest, DownloadService};
use crate::provisioning::{ProvisionError, Provisioner};
use crate::sync::mirror::DownloadedFile;

const DOWNLOAD_SUCCESS_MESSAGE: &str = "Files downloaded successfully.";
const AUTHORIZED_MESSAGE: &str = "Dropbox authorized successfully";

#[derive(Clone)]
pub struct AppState {
    pub downloads: Arc<DownloadService>,
    pub provisioner: Arc<Provisioner>,
}

impl AppState {
    pub fn new(downloads: DownloadService, provisioner: Provisioner) -> Self {
        Self {
            downloads: Arc::new(downloads),
            provisioner: Arc::new(provisioner),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/dropbox/download", post(download))
        .route("/api/dropbox/oauth/authorize", get(authorize))
        .route("/api/dropbox/oauth/callback", get(oauth_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body shared by every route.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            status: "error",
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::new(status, err.to_string())
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        tracing::error!(error = %err, "dropbox authorization failed");
        ApiError::internal("Failed to authorize Dropbox")
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub downloaded_files: Vec<DownloadedFile>,
    pub destination_folder: String,
}

impl From<DownloadManifest> for DownloadResponse {
    fn from(manifest: DownloadManifest) -> Self {
        Self {
            status: "success",
            message: DOWNLOAD_SUCCESS_MESSAGE,
            downloaded_files: manifest.downloaded_files,
            destination_folder: manifest.destination_folder.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub state: Option<String>,
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        message: "healthy",
    })
}

async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Json<DownloadResponse>> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection, "rejected download request body");
        ApiError::from(DownloadError::InvalidRequest)
    })?;
    let manifest = state.downloads.run(request).await?;
    Ok(Json(manifest.into()))
}

async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> ApiResult<Redirect> {
    let url = state.provisioner.authorize_url(params.state.as_deref())?;
    Ok(Redirect::temporary(url.as_str()))
}

async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Json<StatusResponse>> {
    if let Some(error) = params.error {
        tracing::warn!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or_default(),
            "dropbox consent was not granted"
        );
        return Err(ApiError::internal("Failed to authorize Dropbox"));
    }
    if let Some(state_value) = params.state.as_deref() {
        tracing::debug!(state = state_value, "oauth callback received");
    }

    let code = params.code.unwrap_or_default();
    let record = state.provisioner.complete(&code).await?;
    tracing::info!(identity = %record.identity, "dropbox authorized");
    Ok(Json(StatusResponse {
        status: "success",
        message: AUTHORIZED_MESSAGE,
    }))
}
