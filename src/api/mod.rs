pub mod admin;
pub mod health;
pub mod members;
pub mod webhooks;

use crate::auth::AdminTokens;
use crate::db::Repository;
use crate::engine::{ActiveCountPropagator, PositionAllocator};
use crate::orchestration::{MonthlyCycleProcessor, PaymentProcessor, PayoutOrchestrator};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub allocator: PositionAllocator,
    pub propagator: ActiveCountPropagator,
    pub payments: PaymentProcessor,
    pub payouts: PayoutOrchestrator,
    pub cycle: MonthlyCycleProcessor,
    pub admin_tokens: AdminTokens,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<Repository>,
        allocator: PositionAllocator,
        propagator: ActiveCountPropagator,
        payments: PaymentProcessor,
        payouts: PayoutOrchestrator,
        cycle: MonthlyCycleProcessor,
        admin_tokens: AdminTokens,
    ) -> Self {
        Self {
            repo,
            allocator,
            propagator,
            payments,
            payouts,
            cycle,
            admin_tokens,
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
        .route("/v1/members", post(members::signup))
        .route("/v1/members/:id", get(members::get_member))
        .route(
            "/v1/members/:id/commissions",
            get(members::get_member_commissions),
        )
        .route("/v1/events/payment", post(webhooks::payment_event))
        .route("/v1/events/subscription", post(webhooks::subscription_event))
        .route("/v1/admin/allocate", post(admin::allocate))
        .route("/v1/admin/recompute-rates", post(admin::recompute_rates))
        .route("/v1/admin/manual-payout", post(admin::manual_payout))
        .route("/v1/admin/batches/plan", post(admin::plan_batch))
        .route("/v1/admin/batches/:id/trigger", post(admin::trigger_batch))
        .route("/v1/admin/batches/:id/resolve", post(admin::resolve_batch))
        .route("/v1/admin/cycle", post(admin::run_cycle))
        .layer(cors)
        .with_state(state)
}
