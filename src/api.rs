//! # API Server Module
//!
//! ## Purpose
//! REST API server exposing the constitution content, search, popularity and
//! reading-threshold endpoints, plus cache management and health reporting.
//!
//! ## Input/Output Specification
//! - **Input**: HTTP requests with content selectors, search queries, filters
//! - **Output**: JSON responses with content, results, metadata, system status
//! - **Endpoints**: Content, search, popular, reading threshold, admin
//!
//! ## Key Features
//! - Error-kind to status-code mapping (404/400/503/500)
//! - Fire-and-forget view tracking on content reads
//! - CORS support for web frontends
//! - Structured error responses

use crate::content::PopulateMode;
use crate::errors::ServiceError;
use crate::ContentKind;
use crate::search::{SearchFilters, SearchRequest};
use crate::tasks;
use crate::utils::Timer;
use actix_cors::Cors;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Result as ActixResult};
use serde::{Deserialize, Serialize};

/// Application state wrapper for the API server
pub struct ApiServer {
    app_state: crate::AppState,
}

/// Query parameters accepted by the search endpoint
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    /// Raw filter strings; non-numeric values are rejected as invalid
    pub chapter: Option<String>,
    pub article: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub highlight: Option<bool>,
    pub no_cache: Option<bool>,
}

/// Query parameters shared by content read endpoints
#[derive(Debug, Deserialize)]
pub struct ViewParams {
    pub user_id: Option<String>,
    pub device_type: Option<String>,
}

/// Query parameters for the popularity endpoint
#[derive(Debug, Deserialize)]
pub struct PopularParams {
    pub timeframe: Option<String>,
    pub limit: Option<usize>,
    pub content_type: Option<String>,
}

/// Query parameters for the reading threshold endpoint
#[derive(Debug, Deserialize)]
pub struct ThresholdParams {
    pub content_type: String,
    pub reference: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub components: HealthComponents,
}

/// Component health status
#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub cache: String,
    pub storage: String,
    pub document: String,
}

impl ApiServer {
    /// Create new API server
    pub fn new(app_state: crate::AppState) -> Self {
        Self { app_state }
    }

    /// Run the API server
    pub async fn run(self) -> crate::errors::Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.app_state.config.server.host, self.app_state.config.server.port
        );
        let enable_cors = self.app_state.config.server.enable_cors;

        tracing::info!("Starting API server on {}", bind_addr);

        let server = HttpServer::new(move || {
            let cors = if enable_cors {
                Cors::permissive()
            } else {
                Cors::default()
            };
            App::new()
                .wrap(cors)
                .app_data(web::Data::new(self.app_state.clone()))
                .configure(configure_routes)
        })
        .bind(&bind_addr)
        .map_err(|e| ServiceError::Internal {
            message: format!("Failed to bind server to {}: {}", bind_addr, e),
        })?
        .run();

        server.await.map_err(|e| ServiceError::Internal {
            message: format!("Server error: {}", e),
        })?;

        Ok(())
    }
}

/// Route table, shared between the server and handler tests
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_handler))
        .route("/health", web::get().to(health_handler))
        .route("/stats", web::get().to(stats_handler))
        .route("/constitution", web::get().to(overview_handler))
        .route("/constitution/reload", web::post().to(reload_handler))
        .route("/constitution/search", web::get().to(search_handler))
        .route("/constitution/popular", web::get().to(popular_handler))
        .route(
            "/constitution/reading/threshold",
            web::get().to(threshold_handler),
        )
        .route(
            "/constitution/chapters/{chapter}",
            web::get().to(chapter_handler),
        )
        .route(
            "/constitution/chapters/{chapter}/articles/{article}",
            web::get().to(article_handler),
        )
        .route("/cache/users/{user_id}", web::delete().to(clear_user_handler));
}

/// Map a service error onto its HTTP status
fn error_response(e: &ServiceError) -> HttpResponse {
    let body = serde_json::json!({
        "error": e.category(),
        "message": e.to_string(),
    });
    match e {
        ServiceError::NotFound { .. } => HttpResponse::NotFound().json(body),
        ServiceError::InvalidQuery { .. } => HttpResponse::BadRequest().json(body),
        ServiceError::SourceUnavailable { .. } => {
            tracing::error!("Document source unavailable: {}", e);
            HttpResponse::ServiceUnavailable().json(body)
        }
        _ => {
            tracing::error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "internal",
                "message": "internal server error",
            }))
        }
    }
}

/// Client address for analytics, honoring proxy headers
fn client_ip(req: &HttpRequest) -> Option<String> {
    req.connection_info()
        .realip_remote_addr()
        .map(str::to_string)
}

/// Fire-and-forget content view event
fn record_view(
    app_state: &crate::AppState,
    kind: ContentKind,
    reference: String,
    params: &ViewParams,
    ip: Option<String>,
) {
    let tracker = app_state.view_tracker.clone();
    let user_id = params.user_id.clone();
    let device_type = params.device_type.clone();
    tasks::spawn_detached("content_view", async move {
        tracker
            .track(
                kind,
                &reference,
                user_id.as_deref(),
                device_type.as_deref(),
                ip.as_deref(),
            )
            .await;
        Ok(())
    });
}

/// Full constitution overview
async fn overview_handler(app_state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    match app_state.content.get_document(PopulateMode::Deferred).await {
        Ok(document) => Ok(HttpResponse::Ok().json(document)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// One chapter by number; counts a chapter view
async fn chapter_handler(
    app_state: web::Data<crate::AppState>,
    path: web::Path<u32>,
    params: web::Query<ViewParams>,
    req: HttpRequest,
) -> ActixResult<HttpResponse> {
    let number = path.into_inner();
    match app_state
        .content
        .get_chapter(number, PopulateMode::Deferred)
        .await
    {
        Ok(chapter) => {
            record_view(
                &app_state,
                ContentKind::Chapter,
                number.to_string(),
                &params,
                client_ip(&req),
            );
            Ok(HttpResponse::Ok().json(chapter))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// One article by chapter and article number; counts an article view
async fn article_handler(
    app_state: web::Data<crate::AppState>,
    path: web::Path<(u32, u32)>,
    params: web::Query<ViewParams>,
    req: HttpRequest,
) -> ActixResult<HttpResponse> {
    let (chapter, article) = path.into_inner();
    match app_state
        .content
        .get_article(chapter, article, PopulateMode::Deferred)
        .await
    {
        Ok(found) => {
            record_view(
                &app_state,
                ContentKind::Article,
                format!("{}.{}", chapter, article),
                &params,
                client_ip(&req),
            );
            Ok(HttpResponse::Ok().json(found))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// Search endpoint handler
async fn search_handler(
    app_state: web::Data<crate::AppState>,
    params: web::Query<SearchParams>,
) -> ActixResult<HttpResponse> {
    let timer = Timer::new("search_request");
    let search_config = &app_state.config.search;

    let filters = match SearchFilters::parse(params.chapter.as_deref(), params.article.as_deref()) {
        Ok(filters) => filters,
        Err(e) => return Ok(error_response(&e)),
    };
    let limit = params
        .limit
        .unwrap_or(search_config.default_limit)
        .clamp(1, search_config.max_limit);

    let request = SearchRequest {
        query: params.q.clone().unwrap_or_default(),
        filters,
        limit,
        offset: params.offset.unwrap_or(0),
        highlight: params.highlight.unwrap_or(true),
        bypass_cache: params.no_cache.unwrap_or(false),
    };

    match app_state.search_engine.search(request).await {
        Ok(response) => {
            tracing::debug!(elapsed_ms = timer.elapsed_ms(), "Search completed");
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// Popularity ranking endpoint handler
async fn popular_handler(
    app_state: web::Data<crate::AppState>,
    params: web::Query<PopularParams>,
) -> ActixResult<HttpResponse> {
    let timeframe = match params
        .timeframe
        .as_deref()
        .unwrap_or("weekly")
        .parse::<crate::analytics::Timeframe>()
    {
        Ok(timeframe) => timeframe,
        Err(e) => return Ok(error_response(&e)),
    };
    let kind = match params.content_type.as_deref() {
        Some(raw) => match raw.parse::<ContentKind>() {
            Ok(kind) => Some(kind),
            Err(e) => return Ok(error_response(&e)),
        },
        None => None,
    };
    let response = app_state
        .view_tracker
        .popular(timeframe, params.limit, kind)
        .await;
    Ok(HttpResponse::Ok().json(response))
}

/// Reading completion threshold endpoint handler
async fn threshold_handler(
    app_state: web::Data<crate::AppState>,
    params: web::Query<ThresholdParams>,
) -> ActixResult<HttpResponse> {
    let kind = match params.content_type.parse::<ContentKind>() {
        Ok(kind) => kind,
        Err(e) => return Ok(error_response(&e)),
    };
    match app_state.estimator.threshold(kind, &params.reference).await {
        Ok(estimate) => Ok(HttpResponse::Ok().json(estimate)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Reload the document from its source and refresh the overview cache
async fn reload_handler(app_state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    match app_state.content.reload().await {
        Ok(document) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "reloaded",
            "title": document.title,
            "chapters": document.chapters.len(),
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Clear every cached entry belonging to one user
async fn clear_user_handler(
    app_state: web::Data<crate::AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let user_id = path.into_inner();
    let cleared = app_state.content.invalidate_user(&user_id).await;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "user_id": user_id,
        "cleared_entries": cleared,
    })))
}

/// Health check endpoint handler
async fn health_handler(app_state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    let cache_status = if app_state.cache.health_check().await {
        "healthy"
    } else {
        "unhealthy"
    };
    let storage_status = match app_state.storage.health_check() {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    let document_status = match app_state.content.get_document(PopulateMode::Deferred).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let statuses = [cache_status, storage_status, document_status];
    let response = HealthResponse {
        status: if statuses.iter().all(|s| *s == "healthy") {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        components: HealthComponents {
            cache: cache_status.to_string(),
            storage: storage_status.to_string(),
            document: document_status.to_string(),
        },
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Statistics endpoint handler
async fn stats_handler(app_state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    let document = match app_state.content.get_document(PopulateMode::Deferred).await {
        Ok(document) => document,
        Err(e) => return Ok(error_response(&e)),
    };
    let article_count: usize = document
        .chapters
        .iter()
        .map(|c| c.all_articles().count())
        .sum();

    let response = serde_json::json!({
        "document": {
            "title": document.title,
            "chapters": document.chapters.len(),
            "articles": article_count,
            "words": document.word_count(),
        },
        "cache": {
            "healthy": app_state.cache.health_check().await,
        },
    });

    Ok(HttpResponse::Ok().json(response))
}

/// Index page handler
async fn index_handler() -> ActixResult<HttpResponse> {
    let html = r#"
    <!DOCTYPE html>
    <html>
    <head>
        <title>Constitution Search Service</title>
        <style>
            body { font-family: Arial, sans-serif; margin: 40px; }
            .header { color: #2c3e50; }
            .endpoint { margin: 20px 0; padding: 15px; background: #f8f9fa; border-radius: 5px; }
            .method { font-weight: bold; color: #27ae60; }
        </style>
    </head>
    <body>
        <h1 class="header">Constitution Search Service API</h1>
        <p>Cached constitution content with full-text search, popularity
        rankings and reading-progress thresholds.</p>

        <h2>Available Endpoints</h2>

        <div class="endpoint">
            <span class="method">GET</span> /constitution
            <p>The full constitution document.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /constitution/chapters/{n}
            <p>One chapter, with its parts, articles and clauses.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /constitution/search?q=...
            <p>Case-insensitive search across the whole document, with
            optional chapter/article filters and pagination.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /constitution/popular?timeframe=weekly
            <p>Most viewed content over a daily, weekly or monthly window.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /health
            <p>Health status of the cache, storage and document source.</p>
        </div>
    </body>
    </html>
    "#;

    Ok(HttpResponse::Ok().content_type("text/html").body(html))
}
