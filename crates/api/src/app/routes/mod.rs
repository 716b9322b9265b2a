use axum::Router;

pub mod doctor;
pub mod pharmacy;
pub mod system;

/// Router for all versioned API endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/api/v1/pharmacy", pharmacy::router())
        .nest("/api/v1/doctor", doctor::router())
}
