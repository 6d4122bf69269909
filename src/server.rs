//! HTTP query surface over stored results.
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /get-all-data` | `{"keys": [StoredKey, ...]}` |
//! | `GET /detail/{id}/{version}` | `{"portfolio": Portfolio}` |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::portfolio::Portfolio;
use crate::store::{Repository, StoredKey};

/// Body of `GET /get-all-data`.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeysResponse {
    /// Every stored result id.
    pub keys: Vec<StoredKey>,
}

/// Body of `GET /detail/{id}/{version}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DetailResponse {
    /// The stored result.
    pub portfolio: Portfolio,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Error returned by the handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The request is malformed.
    BadRequest(String),
    /// The result or version does not exist.
    NotFound(String),
    /// The store failed.
    Internal(Error),
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        match error {
            Error::VersionNotFound { .. } => ApiError::NotFound(error.to_string()),
            error => ApiError::Internal(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(error) => {
                tracing::error!(%error, "query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Runs a store call off the async workers.
async fn blocking<T, F>(repository: &Arc<Repository>, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Repository) -> Result<T> + Send + 'static,
{
    let repository = Arc::clone(repository);
    tokio::task::spawn_blocking(move || f(&repository))
        .await
        .map_err(|e| ApiError::Internal(Error::Msg(e.to_string())))?
        .map_err(ApiError::from)
}

async fn list_keys(State(repository): State<Arc<Repository>>) -> ApiResult<Json<KeysResponse>> {
    let keys = blocking(&repository, |r| r.list()).await?;
    Ok(Json(KeysResponse { keys }))
}

async fn detail(
    State(repository): State<Arc<Repository>>,
    Path((id, version)): Path<(String, String)>,
) -> ApiResult<Json<DetailResponse>> {
    let version: u64 = version
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid version `{version}`")))?;
    let portfolio = blocking(&repository, move |r| r.fetch(&id, version)).await?;
    Ok(Json(DetailResponse { portfolio }))
}

/// Builds the router.
pub fn router(repository: Arc<Repository>) -> Router {
    Router::new()
        .route("/get-all-data", get(list_keys))
        .route("/detail/{id}/{version}", get(detail))
        .with_state(repository)
}

/// Serves the router on `addr` until the process stops.
pub async fn serve(addr: SocketAddr, repository: Arc<Repository>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "query server listening");
    axum::serve(listener, router(repository)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::store::{MemoryStore, sample_portfolio};

    fn repository() -> (Arc<Repository>, String) {
        let repository = Repository::new(Arc::new(MemoryStore::new()));
        let stored = repository.save(&sample_portfolio("fixed grid")).unwrap();
        repository.save(&sample_portfolio("fixed grid")).unwrap();
        (Arc::new(repository), stored.id)
    }

    async fn fetch(repository: Arc<Repository>, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(repository).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn list_all_keys() {
        let (repository, id) = repository();
        let (status, body) = fetch(repository, "/get-all-data").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["keys"][0]["id"], id.as_str());
        assert_eq!(body["keys"][0]["currentVersion"], 2);
        assert_eq!(body["keys"][0]["strategyName"], "fixed-grid");
    }

    #[tokio::test]
    async fn detail_of_a_version() {
        let (repository, id) = repository();
        let (status, body) = fetch(repository.clone(), &format!("/detail/{id}/1")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["portfolio"]["pair"], "BTC/USDT");
        assert_eq!(body["portfolio"]["strategy"], "fixed grid");

        let (_, again) = fetch(repository, &format!("/detail/{id}/1")).await;
        assert_eq!(body, again);
    }

    #[tokio::test]
    async fn unknown_version_is_not_found() {
        let (repository, id) = repository();
        let (status, body) = fetch(repository, &format!("/detail/{id}/9")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("version 9"));
    }

    #[tokio::test]
    async fn non_numeric_version_is_bad_request() {
        let (repository, id) = repository();
        let (status, _) = fetch(repository, &format!("/detail/{id}/latest")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
