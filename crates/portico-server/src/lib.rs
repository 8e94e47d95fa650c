//! Process wiring for the Portico edge cache: configuration, tracing setup,
//! and the administrative cache-management HTTP surface.
//!
//! The cache and authority services themselves live in `portico-cache` and
//! `portico-authz`; this crate only assembles them and exposes the admin
//! control surface.

pub mod admin;
pub mod config;
pub mod error;
pub mod state;

pub use admin::admin_routes;
pub use config::AppConfig;
pub use error::ApiError;
pub use state::{AppState, NoRoleSource};

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize tracing once at startup. `RUST_LOG` overrides the configured
/// default level.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Build the application router over the given state.
pub fn build_app(state: AppState) -> Router {
    admin_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
