use axum::{routing::get, Router};

use crate::state::AppState;

pub mod bills;
pub mod buildings;
pub mod dashboard;
pub mod documents;
pub mod flats;
pub mod health;
pub mod identity;
pub mod tenants;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(identity::router())
        .merge(buildings::router())
        .merge(flats::router())
        .merge(tenants::router())
        .merge(bills::router())
        .merge(documents::router())
        .merge(dashboard::router())
}
