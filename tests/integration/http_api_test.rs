// tests/integration/http_api_test.rs

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use spirit_reporting_engine::adapter::http::routes::build_router;
use spirit_reporting_engine::app_state::AppState;
use spirit_reporting_engine::config::app_config::AppConfig;
use spirit_reporting_engine::domain::model::access_level::AccessLevel;
use spirit_reporting_engine::domain::model::principal::{Principal, ScopeBindings};
use spirit_reporting_engine::repository::org_directory::InMemoryOrgDirectory;

async fn app() -> Result<Router> {
    Ok(app_with_state().await?.0)
}

async fn app_with_state() -> Result<(Router, AppState)> {
    let dir = InMemoryOrgDirectory::new();
    for p in [
        Principal::new("admin", AccessLevel::Admin, ScopeBindings::default()),
        Principal::new("vend-42", AccessLevel::Vendedor, ScopeBindings::employee(42)),
        Principal::new("auditor", AccessLevel::Auditor, ScopeBindings::default()),
        Principal::new("dir-suc-7", AccessLevel::DirectorSucursal, ScopeBindings::branch(7)),
    ] {
        dir.upsert_principal(p?)?;
    }
    let state = AppState::build(AppConfig::default(), Arc::new(dir)).await?;
    Ok((build_router(state.clone()), state))
}

fn booking(employee: u64, day: u32, net: u32) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "sold_at": format!("2024-03-{day:02}T11:00:00Z"),
        "currency": "EUR",
        "net_amount": net.to_string(),
        "gross_amount": (net + 10).to_string(),
        "commissions": { "employee": "10", "third_party": "0", "partner": "0" },
        "employee_id": employee,
        "branch_id": 7,
        "region_id": 2,
        "company_id": 1,
        "product_type": "package",
        "passengers": 2
    })
}

fn post(uri: &str, principal: Option<&str>, content_type: &str, body: String) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri).header(header::CONTENT_TYPE, content_type);
    if let Some(p) = principal {
        builder = builder.header("x-principal-id", p);
    }
    builder.body(Body::from(body)).unwrap()
}

fn post_json(uri: &str, principal: &str, body: Value) -> Request<Body> {
    post(uri, Some(principal), "application/json", body.to_string())
}

fn get(uri: &str, principal: &str) -> Request<Body> {
    Request::builder().uri(uri).header("x-principal-id", principal).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Result<(StatusCode, Vec<u8>)> {
    let res = app.clone().oneshot(req).await?;
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await?;
    Ok((status, bytes.to_vec()))
}

async fn send_json(app: &Router, req: Request<Body>) -> Result<(StatusCode, Value)> {
    let (status, bytes) = send(app, req).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn report(metric: &str, format: &str) -> Value {
    json!({ "metric": metric, "start": "2024-03-01", "end": "2024-03-31", "group_by": "employee", "format": format })
}

#[tokio::test]
async fn health_needs_no_principal() -> Result<()> {
    let app = app().await?;
    let res = app.oneshot(Request::builder().uri("/health").body(Body::empty())?).await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn api_requires_principal_header() -> Result<()> {
    let app = app().await?;
    let (status, body) = send_json(&app, post("/api/v1/reports", None, "application/json", report("reservas", "json").to_string())).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "missing_principal");

    let (status, body) = send_json(&app, post_json("/api/v1/reports", "nadie", report("reservas", "json"))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unknown_principal");
    Ok(())
}

#[tokio::test]
async fn reports_follow_the_caller_scope() -> Result<()> {
    let app = app().await?;
    let batch = json!([booking(42, 4, 100), booking(42, 5, 200), booking(43, 5, 500)]);
    let (status, body) = send_json(&app, post_json("/api/v1/bookings", "admin", batch)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["accepted"].as_array().map(Vec::len), Some(3));

    let (status, body) = send_json(&app, post_json("/api/v1/reports", "vend-42", report("ventas_netas", "json"))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["rows"].as_array().map(Vec::len), Some(1));

    let (status, bytes) = send(&app, post_json("/api/v1/reports", "admin", report("ventas_netas", "csv"))).await?;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(bytes)?;
    assert!(csv.starts_with("employee,ventas_netas,bookings,currency"));
    assert_eq!(csv.lines().count(), 3);

    let (status, body) = send_json(&app, post_json("/api/v1/reports", "admin", report("ventas_netas", "pdf"))).await?;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["code"], "unsupported_format");

    let (status, body) = send_json(&app, post_json("/api/v1/reports", "admin", report("ventas_lunares", "json"))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "unknown_metric");
    Ok(())
}

#[tokio::test]
async fn auditor_cannot_write() -> Result<()> {
    let app = app().await?;
    let (status, body) = send_json(&app, post_json("/api/v1/bookings", "auditor", json!([booking(42, 6, 80)]))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "read_only_scope");

    let (status, _) = send_json(&app, post_json("/api/v1/rules/evaluate", "vend-42", json!({}))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn forecast_without_history_is_unprocessable() -> Result<()> {
    let app = app().await?;
    let req = json!({ "metric": "ventas_netas", "start": "2024-03-01", "end": "2024-03-05", "horizon_days": 7 });
    let (status, body) = send_json(&app, post_json("/api/v1/forecasts", "admin", req)).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_history");
    Ok(())
}

const RULE_YAML: &str = r#"
id: reservas-altas-sucursal
name: Pico de reservas por sucursal
metric: reservas
group_by: branch
condition:
  kind: threshold
  op: gt
  value: "1"
severity: high
channels: [in_app]
audience: [DIRECTOR_SUCURSAL]
"#;

#[tokio::test]
async fn rule_to_alert_to_inbox() -> Result<()> {
    let (app, state) = app_with_state().await?;
    send_json(&app, post_json("/api/v1/bookings", "admin", json!([booking(42, 5, 100), booking(43, 5, 300)]))).await?;

    let (status, body) = send_json(&app, post("/api/v1/rules", Some("admin"), "application/yaml", RULE_YAML.into())).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["version"], 1);

    let (status, body) = send_json(&app, post("/api/v1/rules", Some("admin"), "application/yaml", "id: [".into())).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, body) = send_json(&app, post_json("/api/v1/rules/evaluate", "admin", json!({ "as_of": "2024-03-05" }))).await?;
    assert_eq!(status, StatusCode::OK);
    let created = body["data"]["created"].as_array().cloned().unwrap_or_default();
    assert_eq!(created.len(), 1);
    let alert_id = created[0].as_str().unwrap().to_string();

    let (status, body) = send_json(&app, get(&format!("/api/v1/alerts/{alert_id}"), "dir-suc-7")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], alert_id.as_str());

    // Quien no es destinatario ni tiene alcance total no ve la alerta.
    let (status, _) = send_json(&app, get(&format!("/api/v1/alerts/{alert_id}"), "vend-42")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Sin el scheduler en marcha la entrega la hace el propio test.
    state.dispatcher.process_ready().await?;
    let (status, body) = send_json(&app, get("/api/v1/inbox", "dir-suc-7")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let (status, body) = send_json(&app, get(&format!("/api/v1/alerts/{}", Uuid::new_v4()), "admin")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "alert_not_found");
    Ok(())
}
