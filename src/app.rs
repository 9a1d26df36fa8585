//! Application wiring: shared state and the HTTP router

use crate::{
    api,
    auth::{self, api as auth_api, auth_middleware, JwtHandler},
    config::AppConfig,
    mail::Mailer,
    middleware::{rate_limit_middleware, request_logging, RateLimitLayer},
    store::Store,
};
use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub jwt: Arc<JwtHandler>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
    // Shared HTTP client for outbound calls (OAuth key fetches)
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn Store>, mailer: Arc<dyn Mailer>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        let jwt = Arc::new(JwtHandler::new(
            config.auth.jwt_secret.clone(),
            config.auth.jwt_expiration_hours,
        ));

        Ok(Self {
            store,
            jwt,
            mailer,
            config: Arc::new(config),
            http_client,
        })
    }

    pub fn bcrypt_cost(&self) -> u32 {
        self.config.auth.bcrypt_cost
    }
}

/// Create the seed admin account if configured and not yet present
pub fn seed_admin(state: &AppState) -> Result<()> {
    let Some(seed) = &state.config.seed_admin else {
        return Ok(());
    };
    let created = auth_api::create_local_user(
        state,
        &seed.name,
        &seed.email,
        &seed.password,
        auth::models::UserRole::Admin,
        None,
    )?;
    if created.is_some() {
        info!("🔐 Seed admin created: {}", seed.email);
    }
    Ok(())
}

/// Build the full router
pub fn build_router(state: AppState, limiter: RateLimitLayer) -> Router {
    // Public auth routes, rate limited per client IP
    let auth_routes = Router::new()
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/login", post(auth_api::login))
        .route("/api/auth/google", post(auth_api::google_login))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .with_state(state.clone());

    // Protected API routes
    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth_api::get_current_user))
        .route("/api/auth/password", put(auth_api::change_password))
        .route("/api/admin/users", get(auth_api::list_users))
        .route("/api/admin/users/:id", axum::routing::delete(auth_api::delete_user))
        .route(
            "/api/patients",
            get(api::patients::list_patients).post(api::patients::create_patient),
        )
        .route("/api/patients/me", get(api::patients::my_profile))
        .route(
            "/api/patients/:id",
            get(api::patients::get_patient)
                .put(api::patients::update_patient)
                .delete(api::patients::delete_patient),
        )
        .route(
            "/api/prescriptions",
            get(api::prescriptions::list_prescriptions)
                .post(api::prescriptions::create_prescription),
        )
        .route(
            "/api/prescriptions/:id",
            get(api::prescriptions::get_prescription),
        )
        .route(
            "/api/prescriptions/:id/pdf",
            get(api::prescriptions::download_pdf),
        )
        .route(
            "/api/prescriptions/:id/cancel",
            post(api::prescriptions::cancel_prescription),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/verify/:id", get(api::prescriptions::verify_prescription))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}
