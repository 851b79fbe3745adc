// Standings Ingest - Web Server
// REST API with Axum; every import goes through the same Importer as the CLI

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use standings_ingest::{
    logging, AuditEntry, Config, ImportError, ImportResult, Importer, SeasonCount, SeasonPeriod,
    StoreSummary,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    importer: Arc<Importer>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::err(message))).into_response()
}

/// POST /api/import request body
#[derive(Deserialize)]
struct ImportRequest {
    raw_text: String,
    town_code: String,
    season_year: i32,
    season_period: SeasonPeriod,
}

#[derive(Serialize)]
struct SummaryResponse {
    #[serde(flatten)]
    totals: StoreSummary,
    seasons: Vec<SeasonCount>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/import - Ingest one pasted standings block
async fn import_standings(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Response {
    let importer = Arc::clone(&state.importer);

    // Import does blocking file and SQLite I/O
    let outcome = tokio::task::spawn_blocking(move || {
        importer.import(
            &request.raw_text,
            &request.town_code,
            request.season_year,
            request.season_period,
        )
    })
    .await;

    match outcome {
        Ok(Ok(result)) => (StatusCode::OK, Json(ApiResponse::<ImportResult>::ok(result))).into_response(),
        Ok(Err(e)) if e.is_busy() => {
            warn!("import rejected: {}", e);
            failure(StatusCode::CONFLICT, e.to_string())
        }
        Ok(Err(e @ ImportError::UnknownTown(_))) => failure(StatusCode::BAD_REQUEST, e.to_string()),
        Ok(Err(e)) => {
            error!("import failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!("import task panicked: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "import task failed")
        }
    }
}

/// GET /api/summary - Store totals and per-season team counts
async fn get_summary(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.importer.store();
    let response = SummaryResponse {
        totals: store.summary(),
        seasons: store.season_counts(),
    };
    Json(ApiResponse::ok(response))
}

/// GET /api/missing-seasons - Audited seasons with no rows in the store
async fn get_missing_seasons(State(state): State<AppState>) -> Response {
    let importer = Arc::clone(&state.importer);

    let outcome = tokio::task::spawn_blocking(move || {
        importer.audit_log().missing_seasons(importer.store())
    })
    .await;

    match outcome {
        Ok(Ok(missing)) => {
            (StatusCode::OK, Json(ApiResponse::<Vec<AuditEntry>>::ok(missing))).into_response()
        }
        Ok(Err(e)) => {
            error!("reading audit log failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!("audit scan task panicked: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "audit scan failed")
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/import", post(import_standings))
        .route("/summary", get(get_summary))
        .route("/missing-seasons", get(get_missing_seasons))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config_path = std::env::var("STANDINGS_CONFIG").unwrap_or_else(|_| "standings.toml".to_string());
    let config = Config::load(&PathBuf::from(config_path))?;
    let importer = Importer::from_config(&config)?;
    info!(
        path = %config.store.path.display(),
        records = importer.store().len(),
        lock = ?importer.store().lock_policy(),
        "store opened"
    );

    let state = AppState {
        importer: Arc::new(importer),
    };
    let app = build_router(state);

    let addr = std::env::var("STANDINGS_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server running on http://{}", addr);
    info!("   API: http://{}/api/summary", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
