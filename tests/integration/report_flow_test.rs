// tests/integration/report_flow_test.rs
//! Ingesta -> reporte -> pronóstico a través de los casos de uso ensamblados
//! por `AppState`.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use spirit_reporting_engine::app_state::AppState;
use spirit_reporting_engine::config::app_config::AppConfig;
use spirit_reporting_engine::domain::error::{EngineError, ForecastError, MetricsError, ScopeError};
use spirit_reporting_engine::domain::model::access_level::AccessLevel;
use spirit_reporting_engine::domain::model::booking::{BookingRecord, CommissionBreakdown, ProductType};
use spirit_reporting_engine::domain::model::ids::{BranchId, CompanyId, EmployeeId, RegionId};
use spirit_reporting_engine::domain::model::principal::{Principal, ScopeBindings};
use spirit_reporting_engine::repository::org_directory::InMemoryOrgDirectory;
use spirit_reporting_engine::usecase::forecast_metric::{ForecastMode, ForecastOutcome, ForecastRequest};
use spirit_reporting_engine::usecase::generate_report::{ReportFormat, ReportRequest};

fn directory() -> Arc<InMemoryOrgDirectory> {
    let dir = InMemoryOrgDirectory::new();
    for p in [
        Principal::new("admin", AccessLevel::Admin, ScopeBindings::default()),
        Principal::new("vend-42", AccessLevel::Vendedor, ScopeBindings::employee(42)),
        Principal::new("auditor", AccessLevel::Auditor, ScopeBindings::default()),
        Principal::new("contador", AccessLevel::Contador, ScopeBindings::default()),
    ] {
        dir.upsert_principal(p.unwrap()).unwrap();
    }
    Arc::new(dir)
}

fn booking(employee: u64, date: NaiveDate, net: i64) -> BookingRecord {
    let sold_at = Utc.from_utc_datetime(&date.and_hms_opt(10, 30, 0).unwrap());
    BookingRecord {
        id: Uuid::new_v4(),
        sold_at,
        currency: "EUR".into(),
        net_amount: Decimal::new(net, 0),
        gross_amount: Decimal::new(net + 20, 0),
        commissions: CommissionBreakdown {
            employee: Decimal::new(15, 0),
            third_party: Decimal::new(5, 0),
            partner: Decimal::ZERO,
        },
        employee_id: EmployeeId(employee),
        branch_id: BranchId(7),
        region_id: RegionId(2),
        company_id: CompanyId(1),
        partner_id: None,
        customer_id: None,
        product_type: ProductType::Flight,
        passengers: 1,
    }
}

fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn report(metric: &str, group_by: Option<&str>, format: ReportFormat) -> ReportRequest {
    ReportRequest {
        metric: metric.into(),
        start: jan(1),
        end: jan(31),
        group_by: group_by.map(str::to_string),
        format,
        rates: None,
    }
}

async fn state() -> Result<AppState> {
    let state = AppState::build(AppConfig::default(), directory()).await?;
    state
        .ingest
        .execute(
            "admin",
            vec![booking(42, jan(5), 100), booking(42, jan(12), 300), booking(43, jan(12), 600)],
        )
        .await?;
    Ok(state)
}

#[tokio::test]
async fn vendedor_and_admin_see_their_own_totals() -> Result<()> {
    let state = state().await?;

    let mine = state.reports.execute("vend-42", report("ventas_netas", None, ReportFormat::Json)).await?;
    assert_eq!(mine.result.total, Decimal::new(400, 0));
    assert_eq!(mine.content_type, "application/json");

    let all = state.reports.execute("admin", report("ventas_netas", None, ReportFormat::Json)).await?;
    assert_eq!(all.result.total, Decimal::new(1000, 0));

    // Misma petición sin ingesta intermedia: mismo resultado.
    let again = state.reports.execute("admin", report("ventas_netas", None, ReportFormat::Json)).await?;
    assert_eq!(again.result, all.result);
    assert_eq!(again.body, all.body);
    Ok(())
}

#[tokio::test]
async fn ingestion_invalidates_cached_reports() -> Result<()> {
    let state = state().await?;
    let before = state.reports.execute("admin", report("reservas", None, ReportFormat::Json)).await?;
    assert_eq!(before.result.total, Decimal::new(3, 0));
    assert!(state.cache.len().await >= 1);

    let summary = state.ingest.execute("admin", vec![booking(43, jan(20), 50)]).await?;
    assert_eq!(summary.affected_dates, vec![jan(20)]);

    // Más registros nunca reducen un conteo.
    let after = state.reports.execute("admin", report("reservas", None, ReportFormat::Json)).await?;
    assert_eq!(after.result.total, Decimal::new(4, 0));
    assert!(after.result.total >= before.result.total);
    Ok(())
}

#[tokio::test]
async fn duplicate_booking_is_rejected_and_original_kept() -> Result<()> {
    let state = state().await?;
    let record = booking(42, jan(8), 70);
    state.ingest.execute("admin", vec![record.clone()]).await?;

    let mut tampered = record.clone();
    tampered.net_amount = Decimal::new(9_000, 0);
    tampered.gross_amount = Decimal::new(9_020, 0);
    let err = state.ingest.execute("admin", vec![tampered]).await.unwrap_err();
    assert_eq!(err.kind(), "duplicate_record");

    let res = state.reports.execute("vend-42", report("ventas_netas", None, ReportFormat::Json)).await?;
    assert_eq!(res.result.total, Decimal::new(470, 0));
    Ok(())
}

#[tokio::test]
async fn batch_hitting_a_stored_id_writes_nothing() -> Result<()> {
    let state = state().await?;
    let stored = booking(42, jan(8), 70);
    state.ingest.execute("admin", vec![stored.clone()]).await?;
    let before = state.bookings.count().await?;

    let batch = vec![booking(42, jan(9), 10), booking(43, jan(10), 20), stored.clone()];
    let err = state.ingest.execute("admin", batch).await.unwrap_err();
    assert_eq!(err.kind(), "duplicate_record");
    assert_eq!(state.bookings.count().await?, before);

    let res = state.reports.execute("admin", report("reservas", None, ReportFormat::Json)).await?;
    assert_eq!(res.result.total, Decimal::new(4, 0));
    Ok(())
}

#[tokio::test]
async fn vendedor_cannot_ingest_for_another_employee() -> Result<()> {
    let state = state().await?;
    let before = state.bookings.count().await?;

    let err = state
        .ingest
        .execute("vend-42", vec![booking(42, jan(9), 10), booking(43, jan(9), 999)])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Scope(ScopeError::Forbidden { .. })));
    assert_eq!(err.kind(), "forbidden");
    assert_eq!(state.bookings.count().await?, before);

    // Dentro de su alcance sí escribe.
    let summary = state.ingest.execute("vend-42", vec![booking(42, jan(9), 10)]).await?;
    assert_eq!(summary.accepted.len(), 1);
    Ok(())
}

#[tokio::test]
async fn read_only_and_column_restricted_scopes() -> Result<()> {
    let state = state().await?;

    let err = state.ingest.execute("auditor", vec![booking(42, jan(9), 10)]).await.unwrap_err();
    assert!(matches!(err, EngineError::Scope(ScopeError::ReadOnly { .. })));
    // El auditor sí puede leer.
    let audit = state.reports.execute("auditor", report("reservas", None, ReportFormat::Json)).await?;
    assert_eq!(audit.result.total, Decimal::new(3, 0));

    let err = state.reports.execute("contador", report("pasajeros", None, ReportFormat::Json)).await.unwrap_err();
    assert!(matches!(err, EngineError::Metrics(MetricsError::ColumnRestricted { .. })));
    let commissions = state.reports.execute("contador", report("comisiones", None, ReportFormat::Json)).await?;
    assert_eq!(commissions.result.total, Decimal::new(60, 0));

    let err = state.reports.execute("nadie", report("reservas", None, ReportFormat::Json)).await.unwrap_err();
    assert_eq!(err.kind(), "unknown_principal");
    Ok(())
}

#[tokio::test]
async fn csv_and_presentation_formats() -> Result<()> {
    let state = state().await?;

    let csv = state.reports.execute("admin", report("ventas_netas", Some("employee"), ReportFormat::Csv)).await?;
    assert!(csv.content_type.starts_with("text/csv"));
    let lines: Vec<&str> = csv.body.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("employee,ventas_netas,bookings,currency"));

    for format in [ReportFormat::Pdf, ReportFormat::Excel] {
        let err = state.reports.execute("admin", report("ventas_netas", None, format)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    let err = state.reports.execute("admin", report("ventas_lunares", None, ReportFormat::Json)).await.unwrap_err();
    assert!(matches!(err, EngineError::Metrics(MetricsError::UnknownMetric { .. })));

    let mut backwards = report("ventas_netas", None, ReportFormat::Json);
    backwards.start = jan(31);
    backwards.end = jan(1);
    let err = state.reports.execute("admin", backwards).await.unwrap_err();
    assert!(matches!(err, EngineError::Metrics(MetricsError::InvalidRange { .. })));
    Ok(())
}

fn forecast_request(start: NaiveDate, end: NaiveDate, mode: ForecastMode) -> ForecastRequest {
    ForecastRequest {
        metric: "ventas_netas".into(),
        start,
        end,
        horizon_days: 7,
        model: None,
        monthly: false,
        mode,
    }
}

#[tokio::test]
async fn forecast_uses_the_principal_history() -> Result<()> {
    let state = AppState::build(AppConfig::default(), directory()).await?;
    let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let pattern = [200, 220, 210, 240, 260, 80, 60];
    let records: Vec<BookingRecord> = (0..28)
        .map(|i| booking(42, start + ChronoDuration::days(i), pattern[i as usize % 7] + i))
        .collect();
    state.ingest.execute("admin", records).await?;
    let end = start + ChronoDuration::days(27);

    let out = state.forecasts.execute("vend-42", forecast_request(start, end, ForecastMode::Forecast)).await?;
    let ForecastOutcome::Forecast(series) = out else {
        panic!("expected a forecast");
    };
    assert_eq!(series.points.len(), 7);
    assert_eq!(series.points[0].period_start, end + ChronoDuration::days(1));
    assert!(series.points.iter().all(|p| p.lower <= p.value && p.value <= p.upper));

    // Seis días de historia no alcanzan para un modelo diario.
    let short = state
        .forecasts
        .execute("vend-42", forecast_request(start, start + ChronoDuration::days(5), ForecastMode::Forecast))
        .await;
    assert!(matches!(
        short,
        Err(EngineError::Forecast(ForecastError::InsufficientHistory { required: 14, actual: 6, .. }))
    ));

    let anomalies = state.forecasts.execute("admin", forecast_request(start, end, ForecastMode::Anomalies)).await?;
    let ForecastOutcome::Anomalies { flags, .. } = anomalies else {
        panic!("expected anomaly flags");
    };
    assert_eq!(flags.len(), 28);
    Ok(())
}
