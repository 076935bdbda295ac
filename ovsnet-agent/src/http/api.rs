//! JSON API the orchestration shim drives the local driver through.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::driver::NetworkDriver;
use crate::http::shutdown;
use crate::records::EndpointOperState;
use crate::{Error, Result};

type Driver = Arc<dyn NetworkDriver>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Reply {
    fn ok() -> Json<Self> {
        Json(Self {
            status: "ok".into(),
            message: None,
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AttachRequest {
    pub pid: i32,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_transient() {
            StatusCode::SERVICE_UNAVAILABLE
        } else if self.is_exhausted() {
            StatusCode::INSUFFICIENT_STORAGE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let reply = Reply {
            status: "fail".into(),
            message: Some(self.to_string()),
        };
        (code, Json(reply)).into_response()
    }
}

pub fn router(driver: Driver) -> Router {
    Router::new()
        .route("/v1/endpoints", get(list_endpoints))
        .route(
            "/v1/endpoints/{id}",
            put(create_endpoint).delete(delete_endpoint),
        )
        .route("/v1/endpoints/{id}/attach", post(attach_endpoint))
        .route(
            "/v1/networks/{id}",
            put(create_network).delete(delete_network),
        )
        .with_state(driver)
}

async fn create_endpoint(
    State(driver): State<Driver>,
    Path(id): Path<String>,
) -> Result<Json<Reply>> {
    driver.create_endpoint(&id).await?;
    Ok(Reply::ok())
}

async fn delete_endpoint(
    State(driver): State<Driver>,
    Path(id): Path<String>,
) -> Result<Json<Reply>> {
    driver.delete_endpoint(&id).await?;
    Ok(Reply::ok())
}

async fn attach_endpoint(
    State(driver): State<Driver>,
    Path(id): Path<String>,
    Json(req): Json<AttachRequest>,
) -> Result<Json<Reply>> {
    driver.attach_endpoint(&id, req.pid).await?;
    Ok(Reply::ok())
}

async fn list_endpoints(State(driver): State<Driver>) -> Result<Json<Vec<EndpointOperState>>> {
    Ok(Json(driver.endpoints().await?))
}

async fn create_network(
    State(driver): State<Driver>,
    Path(id): Path<String>,
) -> Result<Json<Reply>> {
    driver.create_network(&id).await?;
    Ok(Reply::ok())
}

async fn delete_network(
    State(driver): State<Driver>,
    Path(id): Path<String>,
) -> Result<Json<Reply>> {
    driver.delete_network(&id).await?;
    Ok(Reply::ok())
}

/// Serves the API on a Unix socket at `path`, replacing a stale socket left by
/// a previous run.
pub async fn serve(path: PathBuf, driver: Driver, cancel: CancellationToken) -> Result<()> {
    if let Err(e) = fs::remove_file(&path)
        && e.kind() != ErrorKind::NotFound
    {
        return Err(e.into());
    }
    let Some(parent) = path.parent() else {
        return Err(std::io::Error::new(
            ErrorKind::NotFound,
            format!("parent of path {} could not resolve", path.display()),
        )
        .into());
    };
    fs::create_dir_all(parent)?;
    let listener = UnixListener::bind(&path)?;
    info!("agent api listening on {}", path.display());

    axum::serve(listener, router(driver))
        .with_graceful_shutdown(shutdown(cancel))
        .await
        .inspect_err(|e| error!(%e, "agent api failed"))?;
    Ok(())
}
