//! HTTP API for the Bastion licensing service.
//!
//! A thin axum binding over [`bastion_license::LicenseService`]. Routing and
//! the admin capability check live here; every licensing decision is made
//! by the core.

mod api;
mod auth;
mod error;

use axum::{
    Router,
    routing::{get, post},
};
use bastion_license::LicenseService;
use std::sync::Arc;

pub use api::{AdminUser, HealthResponse, LoginResponse, VerifyResponse};
pub use auth::{Admin, AdminAuth, AdminCredentials, AdminToken, SESSION_TTL};
pub use error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: LicenseService,
    pub auth: Arc<AdminAuth>,
}

impl AppState {
    /// Bundles a service with the ways administrators may authenticate.
    pub fn new(service: LicenseService, auth: AdminAuth) -> Self {
        Self {
            service,
            auth: Arc::new(auth),
        }
    }
}

/// Build the HTTP API router with the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/verify", post(api::verify))
        .route("/api/auth/login", post(api::login))
        .route("/api/licenses", get(api::list_licenses).post(api::create_license))
        .route(
            "/api/licenses/{id}",
            get(api::get_license)
                .patch(api::update_license)
                .delete(api::delete_license),
        )
        .route("/api/users", post(api::create_user))
        .route("/api/users/{username}", get(api::get_user))
        .with_state(state)
}
