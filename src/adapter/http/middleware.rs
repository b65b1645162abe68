use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{warn, Instrument};

use super::controller::ApiResponse;

pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// Principal que hace la petición, ya autenticado aguas arriba.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

/// Exige la cabecera `x-principal-id` y la deja en las extensiones de la petición.
///
/// La autenticación la resuelve el gateway; aquí sólo se identifica al
/// principal para que el resolvedor de alcance construya su filtro.
pub async fn principal_middleware(mut req: Request, next: Next) -> Response {
    let caller = req
        .headers()
        .get(PRINCIPAL_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let Some(principal_id) = caller else {
        warn!(path = %req.uri().path(), "request without principal header");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error("missing_principal", "x-principal-id header is required")),
        )
            .into_response();
    };

    let span = tracing::info_span!("http_request", principal = %principal_id, path = %req.uri().path());
    req.extensions_mut().insert(Caller(principal_id));
    next.run(req).instrument(span).await
}
