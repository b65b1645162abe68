use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};

use crate::adapter::http::{controller, middleware::principal_middleware};
use crate::app_state::AppState;

/// Construye el router HTTP con rutas, middlewares y controladores
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/reports", post(controller::generate_report))
        .route("/forecasts", post(controller::forecast_metric))
        .route("/bookings", post(controller::ingest_bookings))
        .route("/rules", post(controller::register_rule))
        .route("/rules/evaluate", post(controller::evaluate_rules))
        .route("/alerts/:id", get(controller::get_alert))
        .route("/alerts/:id/confirmations", post(controller::confirm_delivery))
        .route("/inbox", get(controller::inbox))
        // Todo lo versionado exige principal identificado
        .route_layer(from_fn(principal_middleware));

    Router::new()
        .route("/health", get(controller::health))
        .nest("/api/v1", api)
        .with_state(state)
}
