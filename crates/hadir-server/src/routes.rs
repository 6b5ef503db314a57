use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hadir_core::{Collection, GeofenceConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::store::{FileStore, FileStoreError};

/// Request bodies carry base64 photos.
pub const BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error("invalid body: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] FileStoreError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownCollection(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Store(FileStoreError::Reconcile(_)) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type Shared = State<Arc<FileStore>>;

fn collection(name: &str) -> Result<Collection, ApiError> {
    Collection::from_name(name).ok_or_else(|| ApiError::UnknownCollection(name.to_string()))
}

fn records(body: Value) -> Result<Vec<Value>, ApiError> {
    match body {
        Value::Array(items) => Ok(items),
        _ => Err(ApiError::BadRequest("expected a JSON array".into())),
    }
}

fn ok() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_endpoint(State(store): Shared) -> Result<Json<Value>, ApiError> {
    Ok(Json(store.endpoint().await?))
}

async fn set_endpoint(State(store): Shared, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    store.set_endpoint(&body).await?;
    Ok(ok())
}

async fn get_config(State(store): Shared) -> Result<Json<Value>, ApiError> {
    Ok(Json(store.config().await?))
}

async fn set_config(State(store): Shared, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let config: GeofenceConfig =
        serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    store.set_config(&config).await?;
    tracing::info!(
        lat = config.center_lat,
        lng = config.center_lng,
        max_distance_m = config.max_distance_m,
        "office geofence updated"
    );
    Ok(ok())
}

async fn list(State(store): Shared, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    let items = store.list(collection(&name)?).await?;
    Ok(Json(Value::Array(items)))
}

/// `POST /users` replaces the whole list; every other collection appends.
async fn create(
    State(store): Shared,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let collection = collection(&name)?;
    if collection == Collection::Users {
        return replace_collection(&store, collection, body).await;
    }
    if !body.is_object() {
        return Err(ApiError::BadRequest("expected a JSON object".into()));
    }
    store.prepend(collection, body).await?;
    Ok(ok())
}

async fn update(
    State(store): Shared,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    replace_collection(&store, collection(&name)?, body).await
}

async fn replace_collection(
    store: &FileStore,
    collection: Collection,
    body: Value,
) -> Result<Json<Value>, ApiError> {
    let summary = store.replace(collection, records(body)?).await?;
    tracing::info!(
        collection = %collection,
        deleted = summary.deleted,
        written = summary.written,
        "collection replaced"
    );
    Ok(ok())
}

async fn log_request(req: Request, next: Next) -> Response {
    let method: Method = req.method().clone();
    let path = req.uri().path().to_owned();
    let resp = next.run(req).await;
    tracing::info!(%method, path = %path, status = resp.status().as_u16(), "request");
    resp
}

/// The local backend API, mounted under `/api`.
pub fn router(store: Arc<FileStore>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/endpoint", get(get_endpoint).post(set_endpoint))
        .route("/config", get(get_config).post(set_config))
        .route("/{collection}", get(list).post(create))
        .route("/{collection}/update", post(update))
        .with_state(store);

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(middleware::from_fn(log_request))
}

/// Serve the API on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    store: Arc<FileStore>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await
}
