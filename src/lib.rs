//! Storefront API Library
//!
//! Printful catalog, Stripe Checkout and the reconciliation that turns paid
//! checkout sessions into Printful draft orders.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{routing::get, Router};
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

/// Every route served under `/api/v1`.
pub fn api_v1_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::checkout::checkout_routes())
        .merge(handlers::orders::orders_routes())
        .merge(handlers::products::products_routes())
        .merge(handlers::payment_webhooks::payment_webhook_routes())
        .merge(handlers::printful_webhooks::printful_webhook_routes())
        .merge(handlers::admin::admin_routes(state))
        .merge(health::health_routes())
}

/// CORS policy from config: explicit origins win, development falls back to permissive,
/// anything else only serves same-origin callers.
pub fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if config.is_development() {
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("no CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

/// Full application router: API, Swagger UI and the HTTP middleware stack.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();
    let cors = cors_layer(&state.config);

    Router::<AppState>::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/api/v1", api_v1_routes(state.clone()))
        .merge(openapi::swagger_ui())
        .layer(tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
