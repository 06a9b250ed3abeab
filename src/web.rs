use crate::{
    catalog::{Item, ItemCreate, StorageError},
    eid::Eid,
    embedding::ExtractionError,
    search::{ImageSource, SearchError, SearchRequest, SearchResponse, SearchService},
};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequest, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<SearchService>,
}

async fn start_app(service: Arc<SearchService>, listen: String, body_limit: usize) -> anyhow::Result<()> {
    let shared_state = Arc::new(SharedState { service });

    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {err}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(err) => {
                    log::error!("failed to install signal handler: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        log::warn!("shutting down");
    }

    let app = router(shared_state, body_limit);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    log::info!("listening on {listen}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(shared_state: Arc<SharedState>, body_limit: usize) -> Router {
    Router::new()
        .route("/api/products", get(list_all).post(create))
        .route("/api/products/category/:category", get(list_by_category))
        .route("/api/products/:id", get(get_item))
        .route("/api/search/upload", post(search_upload))
        .route("/api/search/url", post(search_url))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

/// Run the HTTP daemon until Ctrl+C or SIGTERM.
///
/// `max_image_bytes` bounds decoded uploads; the request body limit leaves
/// room for base64 overhead.
pub fn start_daemon(
    service: Arc<SearchService>,
    listen: &str,
    max_image_bytes: usize,
) -> anyhow::Result<()> {
    let body_limit = max_image_bytes / 3 * 4 + 64 * 1024;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    // the service owns a blocking http client, which must not be dropped
    // inside the runtime
    let result = runtime.block_on(start_app(service.clone(), listen.to_string(), body_limit));
    drop(runtime);
    drop(service);

    result
}

#[derive(Debug)]
enum ApiError {
    Search(SearchError),
    Storage(StorageError),
    BadRequest(String),
    NotFound,
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        ApiError::Search(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(err) => storage_status(err),
            ApiError::Search(err) => match err {
                SearchError::Validation(_) => StatusCode::BAD_REQUEST,
                SearchError::Extraction(ExtractionError::DecodeFailed(_)) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                SearchError::Extraction(ExtractionError::FetchFailed { .. }) => {
                    StatusCode::BAD_GATEWAY
                }
                SearchError::Extraction(ExtractionError::ModelUnavailable(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SearchError::Storage(err) => storage_status(err),
                SearchError::Ranking(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Whether the client may repeat the same request.
    fn retryable(&self) -> bool {
        match self {
            ApiError::Search(SearchError::Extraction(err)) => err.is_retryable(),
            _ => false,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Search(err) => err.to_string(),
            ApiError::Storage(err) => err.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NotFound => "item not found".to_string(),
        }
    }
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::DuplicateId(_) => StatusCode::CONFLICT,
        StorageError::InvalidItem(_) => StatusCode::BAD_REQUEST,
        StorageError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{self:?}");
        } else {
            log::debug!("{self:?}");
        }
        let body = json!({ "error": self.message(), "retryable": self.retryable() });
        (status, Json(body)).into_response()
    }
}

/// `Json` extractor whose rejections render like every other `ApiError`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct ApiJson<T>(T);

async fn list_all(State(state): State<Arc<SharedState>>) -> Result<Json<Vec<Arc<Item>>>, ApiError> {
    Ok(Json(state.service.list_all()?))
}

async fn list_by_category(
    State(state): State<Arc<SharedState>>,
    Path(category): Path<String>,
) -> Result<Json<Vec<Arc<Item>>>, ApiError> {
    Ok(Json(state.service.list_by_category(&category)?))
}

async fn get_item(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<Json<Arc<Item>>, ApiError> {
    state
        .service
        .get(&Eid::from(id))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn create(
    State(state): State<Arc<SharedState>>,
    ApiJson(payload): ApiJson<ItemCreate>,
) -> Result<(StatusCode, Json<Arc<Item>>), ApiError> {
    log::debug!("payload: {:?}", payload.name);
    let item = state.service.catalog().create(payload)?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSearchRequest {
    pub image_b64: String,
    pub category: Option<String>,
    pub min_similarity: Option<f32>,
    pub limit: Option<f64>,
}

impl Debug for UploadSearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UploadSearchRequest {{ image_b64: [REDUCTED], category: {:?}, min_similarity: {:?}, limit: {:?} }}", self.category, self.min_similarity, self.limit)
    }
}

async fn search_upload(
    State(state): State<Arc<SharedState>>,
    ApiJson(payload): ApiJson<UploadSearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    log::debug!("payload: {payload:?}");

    let data = STANDARD
        .decode(payload.image_b64.trim())
        .map_err(|err| ApiError::BadRequest(format!("invalid base64 image: {err}")))?;

    let request = SearchRequest {
        source: ImageSource::Bytes(data),
        category: payload.category,
        min_similarity: payload.min_similarity,
        limit: whole_limit(payload.limit),
    };

    run_search(state, request).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlSearchRequest {
    pub image_url: String,
    pub category: Option<String>,
    pub min_similarity: Option<f32>,
    pub limit: Option<f64>,
}

async fn search_url(
    State(state): State<Arc<SharedState>>,
    ApiJson(payload): ApiJson<UrlSearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    log::debug!("payload: {payload:?}");

    let request = SearchRequest {
        source: ImageSource::Url(payload.image_url),
        category: payload.category,
        min_similarity: payload.min_similarity,
        limit: whole_limit(payload.limit),
    };

    run_search(state, request).await
}

/// Clients send `limit` as any JSON number; fractions truncate toward zero
/// and range clamping happens in the search service.
fn whole_limit(limit: Option<f64>) -> Option<i64> {
    limit.filter(|l| l.is_finite()).map(|l| l.trunc() as i64)
}

/// Extraction blocks on network and CPU, so run it off the async workers.
async fn run_search(
    state: Arc<SharedState>,
    request: SearchRequest,
) -> Result<Json<SearchResponse>, ApiError> {
    let service = state.service.clone();
    tokio::task::block_in_place(move || service.search(request))
        .map(Json)
        .map_err(Into::into)
}
