pub mod challenges;
pub mod connect;
pub mod health;

use crate::db::Repository;
use crate::metrics::CounterMetrics;
use crate::orchestration::{ChallengeTracker, ConnectService};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub connect: Arc<ConnectService>,
    pub challenges: Arc<ChallengeTracker>,
    pub metrics: Arc<CounterMetrics>,
}

impl AppState {
    pub fn new(
        repo: Arc<Repository>,
        connect: Arc<ConnectService>,
        challenges: Arc<ChallengeTracker>,
        metrics: Arc<CounterMetrics>,
    ) -> Self {
        Self {
            repo,
            connect,
            challenges,
            metrics,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .route(
            "/v1/connect/user/:user_id",
            get(connect::get_user)
                .post(connect::request_link)
                .delete(connect::remove_link),
        )
        .route(
            "/v1/connect/user/:user_id/verify",
            post(connect::force_verify),
        )
        .route(
            "/v1/connect/minecraft/:mc_uuid",
            get(connect::get_owner),
        )
        .route("/v1/connect/users", get(connect::get_users))
        .route(
            "/v1/connect/users/connected",
            get(connect::get_connected_users),
        )
        .route("/v1/challenges", post(challenges::register_challenge))
        .layer(cors)
        .with_state(state)
}
