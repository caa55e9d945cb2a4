/// HTTP Server logic
use crate::{
    CleanupResponse, CompareRequest, ErrorResponse, ErrorType, RankResponse, SessionRequest,
    StartRankingRequest, UploadResponse,
};
use axum::extract::{DefaultBodyLimit, Extension, Multipart};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::{http, Json, Router};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use pairrank_core::session::SessionRegistry;
use pairrank_core::store::ItemStore;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::instrument;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Upload a CSV file of items to rank
#[utoipa::path(
post,
tag = "Pairwise Ranking",
path = "/api/upload-csv",
responses(
(status = 200, description = "Session created", body = UploadResponse),
(status = 400, description = "Missing file or unparseable CSV", body = ErrorResponse,
example = json ! ({"error": "No file provided", "error_type": "validation"})),
)
)]
#[instrument(skip_all)]
async fn upload_csv(
    registry: Extension<SessionRegistry>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, Json<ErrorResponse>)> {
    let counter = metrics::counter!("pr_request_count", "endpoint" => "upload_csv");
    counter.increment(1);

    let data = read_file_field(&mut multipart).await?;
    let store = ItemStore::from_csv(&data).map_err(ErrorResponse::from)?;
    let info = registry.create(store);

    let counter = metrics::counter!("pr_request_success", "endpoint" => "upload_csv");
    counter.increment(1);

    Ok(Json(UploadResponse {
        session_id: info.session_id,
        item_count: info.item_count,
        fieldnames: info.fieldnames,
    }))
}

/// Resume a ranking from a progress snapshot
#[utoipa::path(
post,
tag = "Pairwise Ranking",
path = "/api/load-progress",
responses(
(status = 200, description = "Session resumed at its exact saved position", body = RankResponse),
(status = 400, description = "Malformed snapshot", body = ErrorResponse,
example = json ! ({"error": "progress format error: snapshot has no body", "error_type": "format"})),
)
)]
#[instrument(skip_all)]
async fn load_progress(
    registry: Extension<SessionRegistry>,
    mut multipart: Multipart,
) -> Result<Json<RankResponse>, (StatusCode, Json<ErrorResponse>)> {
    let counter = metrics::counter!("pr_request_count", "endpoint" => "load_progress");
    counter.increment(1);

    let data = read_file_field(&mut multipart).await?;
    let (session_id, update) = registry.resume(&data).map_err(|err| {
        let counter = metrics::counter!("pr_request_failure", "endpoint" => "load_progress");
        counter.increment(1);
        tracing::error!("{err}");
        ErrorResponse::from(err)
    })?;

    let counter = metrics::counter!("pr_request_success", "endpoint" => "load_progress");
    counter.increment(1);

    Ok(Json(RankResponse::from_update(session_id, update)))
}

/// Start ranking, optionally shuffling the items first
#[utoipa::path(
post,
tag = "Pairwise Ranking",
path = "/api/start-ranking",
request_body = StartRankingRequest,
responses(
(status = 200, description = "First comparison or immediate completion", body = RankResponse),
(status = 404, description = "Unknown session", body = ErrorResponse,
example = json ! ({"error": "session 42 not found", "error_type": "not_found"})),
)
)]
#[instrument(skip_all, fields(session_id = %req.session_id))]
async fn start_ranking(
    registry: Extension<SessionRegistry>,
    Json(req): Json<StartRankingRequest>,
) -> Result<Json<RankResponse>, (StatusCode, Json<ErrorResponse>)> {
    let counter = metrics::counter!("pr_request_count", "endpoint" => "start_ranking");
    counter.increment(1);

    let update = registry
        .start_ranking(&req.session_id, req.randomize)
        .map_err(ErrorResponse::from)?;

    Ok(Json(RankResponse::from_update(req.session_id, update)))
}

/// Answer the pending comparison
#[utoipa::path(
post,
tag = "Pairwise Ranking",
path = "/api/compare",
request_body = CompareRequest,
responses(
(status = 200, description = "Next comparison or the finished order", body = RankResponse),
(status = 404, description = "Unknown session", body = ErrorResponse,
example = json ! ({"error": "session 42 not found", "error_type": "not_found"})),
(status = 409, description = "No comparison is pending", body = ErrorResponse,
example = json ! ({"error": "no comparison is pending for this session", "error_type": "invalid_state"})),
)
)]
#[instrument(skip_all, fields(session_id = %req.session_id))]
async fn compare(
    registry: Extension<SessionRegistry>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<RankResponse>, (StatusCode, Json<ErrorResponse>)> {
    let start_time = Instant::now();
    let counter = metrics::counter!("pr_request_count", "endpoint" => "compare");
    counter.increment(1);

    let update = registry
        .answer(&req.session_id, req.candidate_preferred)
        .map_err(|err| {
            let counter = metrics::counter!("pr_request_failure", "endpoint" => "compare");
            counter.increment(1);
            tracing::error!("{err}");
            ErrorResponse::from(err)
        })?;

    let histogram = metrics::histogram!("pr_compare_duration");
    histogram.record(start_time.elapsed().as_secs_f64());

    Ok(Json(RankResponse::from_update(req.session_id, update)))
}

/// Download the finished ranking as CSV
#[utoipa::path(
post,
tag = "Pairwise Ranking",
path = "/api/save-results",
request_body = SessionRequest,
responses(
(status = 200, description = "Ranked rows with the original columns", body = String),
(status = 404, description = "Unknown session", body = ErrorResponse),
(status = 409, description = "Ranking is not complete", body = ErrorResponse,
example = json ! ({"error": "ranking is not complete", "error_type": "invalid_state"})),
)
)]
#[instrument(skip_all, fields(session_id = %req.session_id))]
async fn save_results(
    registry: Extension<SessionRegistry>,
    Json(req): Json<SessionRequest>,
) -> Result<(HeaderMap, String), (StatusCode, Json<ErrorResponse>)> {
    let csv = registry
        .export_results(&req.session_id)
        .map_err(ErrorResponse::from)?;
    Ok((csv_attachment_headers("ranked_results.csv"), csv))
}

/// Download a resumable snapshot of the session
#[utoipa::path(
post,
tag = "Pairwise Ranking",
path = "/api/save-progress",
request_body = SessionRequest,
responses(
(status = 200, description = "Resumable progress snapshot", body = String),
(status = 404, description = "Unknown session", body = ErrorResponse),
)
)]
#[instrument(skip_all, fields(session_id = %req.session_id))]
async fn save_progress(
    registry: Extension<SessionRegistry>,
    Json(req): Json<SessionRequest>,
) -> Result<(HeaderMap, String), (StatusCode, Json<ErrorResponse>)> {
    let csv = registry
        .export_progress(&req.session_id)
        .map_err(ErrorResponse::from)?;
    Ok((csv_attachment_headers("inprogress_results.csv"), csv))
}

/// Dispose of a session
#[utoipa::path(
post,
tag = "Pairwise Ranking",
path = "/api/cleanup",
request_body = SessionRequest,
responses((status = 200, description = "Session removed (idempotent)", body = CleanupResponse))
)]
#[instrument(skip_all, fields(session_id = %req.session_id))]
async fn cleanup(
    registry: Extension<SessionRegistry>,
    Json(req): Json<SessionRequest>,
) -> Json<CleanupResponse> {
    registry.dispose(&req.session_id);
    Json(CleanupResponse { success: true })
}

#[utoipa::path(
get,
tag = "Pairwise Ranking",
path = "/health",
responses((status = 200, description = "Everything is working fine"))
)]
/// Health check method
async fn health() {}

/// Prometheus metrics scrape endpoint
#[utoipa::path(
get,
tag = "Pairwise Ranking",
path = "/metrics",
responses((status = 200, description = "Prometheus Metrics", body = String))
)]
async fn metrics(prom_handle: Extension<PrometheusHandle>) -> String {
    prom_handle.render()
}

async fn read_file_field(
    multipart: &mut Multipart,
) -> Result<Vec<u8>, (StatusCode, Json<ErrorResponse>)> {
    let validation = |error: String| ErrorResponse {
        error,
        error_type: ErrorType::Validation,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| validation(err.to_string()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| validation(err.to_string()))?;
            return Ok(bytes.to_vec());
        }
    }

    Err(validation("No file provided".to_string()).into())
}

fn csv_attachment_headers(filename: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONTENT_TYPE, "text/csv".parse().unwrap());
    headers.insert(
        http::header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{filename}\"").parse().unwrap(),
    );
    headers
}

/// Serving method
pub async fn run(
    addr: SocketAddr,
    payload_limit: usize,
    allow_origin: Option<AllowOrigin>,
) -> Result<(), axum::BoxError> {
    // OpenAPI documentation
    #[derive(OpenApi)]
    #[openapi(
    paths(
    upload_csv,
    load_progress,
    start_ranking,
    compare,
    save_results,
    save_progress,
    cleanup,
    health,
    metrics,
    ),
    components(
    schemas(
    UploadResponse,
    StartRankingRequest,
    CompareRequest,
    SessionRequest,
    RankResponse,
    CleanupResponse,
    ErrorResponse,
    ErrorType,
    )
    ),
    tags(
    (name = "Pairwise Ranking", description = "Human-in-the-loop binary insertion ranking API")
    ),
    info(
    title = "Pairwise Ranking",
    )
    )]
    struct ApiDoc;

    // Duration buckets
    let duration_matcher = Matcher::Suffix(String::from("duration"));
    let n_duration_buckets = 35;
    let mut duration_buckets = Vec::with_capacity(n_duration_buckets);
    // Minimum duration in seconds
    let mut value = 0.00001;
    for _ in 0..n_duration_buckets {
        // geometric sequence
        value *= 1.5;
        duration_buckets.push(value);
    }

    // Prometheus handler
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(duration_matcher, &duration_buckets)
        .unwrap();

    let prom_handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");

    // CORS layer
    let allow_origin = allow_origin.unwrap_or(AllowOrigin::any());
    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_origin(allow_origin);

    // One registry for the process, injected into every handler
    let registry = SessionRegistry::new();

    // Create router
    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .route("/api/upload-csv", post(upload_csv))
        .route("/api/load-progress", post(load_progress))
        .route("/api/start-ranking", post(start_ranking))
        .route("/api/compare", post(compare))
        .route("/api/save-results", post(save_results))
        .route("/api/save-progress", post(save_progress))
        .route("/api/cleanup", post(cleanup))
        // Base Health route
        .route("/health", get(health))
        .route("/", get(health))
        // Prometheus metrics route
        .route("/metrics", get(metrics))
        .layer(Extension(registry))
        .layer(Extension(prom_handle.clone()))
        .layer(DefaultBodyLimit::max(payload_limit))
        .layer(cors_layer);

    tracing::info!("Starting HTTP server: {}", addr);

    // Run server
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        // Wait until all requests are finished to shut down
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

impl From<&ErrorType> for StatusCode {
    fn from(value: &ErrorType) -> Self {
        match value {
            ErrorType::NotFound => StatusCode::NOT_FOUND,
            ErrorType::Format => StatusCode::BAD_REQUEST,
            ErrorType::InvalidState => StatusCode::CONFLICT,
            ErrorType::Validation => StatusCode::BAD_REQUEST,
        }
    }
}

/// Convert to Axum supported formats
impl From<ErrorResponse> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: ErrorResponse) -> Self {
        (StatusCode::from(&err.error_type), Json(err))
    }
}
