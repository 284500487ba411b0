/// HTTP server setup and routing
use crate::{
    context::AppContext,
    csrf::CSRF_HEADER,
    error::{AppError, AppResult},
    metrics,
};
use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::{net::SocketAddr, time::Instant};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        // Health check endpoint (no middleware)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(crate::api::routes(&ctx))
        // Provide state - converts Router<AppContext> to Router<()>
        .with_state(ctx.clone())
        .layer(middleware::from_fn(track_http_metrics))
        .layer(cors_layer(&ctx))
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// Credentialed CORS for the member frontend
fn cors_layer(ctx: &AppContext) -> CorsLayer {
    let service = &ctx.config.service;
    let origin = service
        .cors_origin
        .as_deref()
        .unwrap_or(&service.frontend_base_url)
        .trim_end_matches('/');

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CSRF_HEADER),
        ])
        .allow_credentials(true);

    match HeaderValue::from_str(origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!("Invalid CORS origin {:?}; cross-origin requests will be refused", origin);
            layer
        }
    }
}

/// Count and time every request
async fn track_http_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    metrics::record_http_request(
        &method,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Health check handler
async fn health_check(
    axum::extract::State(ctx): axum::extract::State<AppContext>,
) -> Response {
    match crate::db::test_connection(&ctx.db).await {
        Ok(()) => Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "nextSnapshotAt": ctx.scheduler.next_run(),
        }))
        .into_response(),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy" })),
            )
                .into_response()
        }
    }
}

/// Prometheus exposition
async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server
pub async fn serve(ctx: AppContext) -> AppResult<()> {
    let addr = ctx.config.bind_address();

    info!("Clubhouse listening on {}", addr);
    info!("   Service URL: {}", ctx.service_url());
    info!("   Frontend: {}", ctx.config.service.frontend_base_url);

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    // Socket addresses feed the client IP fallback
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
