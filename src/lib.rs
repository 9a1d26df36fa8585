//! MedScript Backend Library
//!
//! Exposes the router, storage backends and services for the server binary
//! and integration tests.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod mail;
pub mod middleware;
pub mod models;
pub mod pdf;
pub mod store;

pub use app::{build_router, AppState};
pub use config::AppConfig;
