//! HTTP surface
//!
//! Provides:
//! - Entry submission and dry-run validation
//! - Mining of the pending pool
//! - Chain, block and entry queries
//! - Chain verification, narrative, stats and the validation audit log
//! - Asset ownership and derivative lineage lookups

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::coordinator::Coordinator;

pub use error::ApiError;

/// State shared across handlers
pub type AppState = Arc<Coordinator>;

/// Build the node router.
pub fn create_router(coordinator: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats))
        .route("/entry", post(routes::submit_entry))
        .route("/entry/validate", post(routes::validate_entry))
        .route("/mine", post(routes::mine))
        .route("/pending", get(routes::pending))
        .route("/chain", get(routes::chain))
        .route("/chain/narrative", get(routes::narrative))
        .route("/validate/chain", get(routes::validate_chain))
        .route("/block/:index", get(routes::block))
        .route("/blocks/latest", get(routes::latest_block))
        .route("/entries/author/:author", get(routes::entries_by_author))
        .route("/entries/search", get(routes::search_entries))
        .route("/audit", get(routes::audit))
        .route("/audit/log", get(routes::audit_log))
        .route("/assets/:asset_id", get(routes::asset))
        .route("/assets/owner/:owner", get(routes::assets_by_owner))
        .route("/derivatives/types", get(routes::derivative_types))
        .route("/derivatives/:block_index/:entry_index", get(routes::derivatives))
        .route("/derivatives/:block_index/:entry_index/lineage", get(routes::lineage))
        .route("/derivatives/:block_index/:entry_index/tree", get(routes::derivation_tree))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}
