// tests/unit/metrics_aggregator_test.rs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use spirit_reporting_engine::config::app_config::ReportingConfig;
use spirit_reporting_engine::domain::error::MetricsError;
use spirit_reporting_engine::domain::model::access_level::AccessLevel;
use spirit_reporting_engine::domain::model::booking::{BookingRecord, CommissionBreakdown, ProductType};
use spirit_reporting_engine::domain::model::currency::ExchangeRateSnapshot;
use spirit_reporting_engine::domain::model::ids::{BranchId, CompanyId, EmployeeId, RegionId};
use spirit_reporting_engine::domain::model::metric::{DateRange, GroupBy, GroupKey, MetricName, MetricResult};
use spirit_reporting_engine::domain::model::scope_filter::{ColumnMask, RowScope, ScopeFilter};
use spirit_reporting_engine::repository::booking_store::{BookingStore, InMemoryBookingStore};
use spirit_reporting_engine::repository::metric_cache::{CacheTicket, InMemoryMetricCache, MetricCache, MetricKey};
use spirit_reporting_engine::service::metrics_aggregator::MetricsAggregator;

fn booking(employee: u64, branch: u64, day: u32, net: i64, currency: &str) -> BookingRecord {
    BookingRecord {
        id: Uuid::new_v4(),
        sold_at: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        currency: currency.into(),
        net_amount: Decimal::new(net, 0),
        gross_amount: Decimal::new(net + 12, 0),
        commissions: CommissionBreakdown {
            employee: Decimal::new(8, 0),
            third_party: Decimal::new(4, 0),
            partner: Decimal::ZERO,
        },
        employee_id: EmployeeId(employee),
        branch_id: BranchId(branch),
        region_id: RegionId(1),
        company_id: CompanyId(1),
        partner_id: None,
        customer_id: None,
        product_type: ProductType::Hotel,
        passengers: 1,
    }
}

fn scope(level: AccessLevel, rows: RowScope) -> ScopeFilter {
    ScopeFilter {
        principal_id: format!("{level}").to_lowercase(),
        level,
        columns: if level == AccessLevel::Contador { ColumnMask::FinancialOnly } else { ColumnMask::Full },
        read_only: level == AccessLevel::Auditor,
        rows,
    }
}

fn january() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
    )
    .unwrap()
}

async fn seeded(cache: Arc<dyn MetricCache>) -> Result<MetricsAggregator> {
    let store = Arc::new(InMemoryBookingStore::new());
    for r in [
        booking(42, 7, 3, 100, "EUR"),
        booking(42, 7, 15, 250, "EUR"),
        booking(43, 7, 10, 400, "EUR"),
        booking(43, 8, 20, 50, "EUR"),
    ] {
        store.append(r).await?;
    }
    // Fuera del rango: nunca cuenta.
    let mut february = booking(42, 7, 1, 999, "EUR");
    february.sold_at = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
    store.append(february).await?;
    Ok(MetricsAggregator::new(store, cache, &ReportingConfig::default()))
}

fn memory_cache() -> Arc<dyn MetricCache> {
    Arc::new(InMemoryMetricCache::new(Duration::from_secs(60)))
}

#[tokio::test]
async fn vendedor_only_sees_own_bookings() -> Result<()> {
    let agg = seeded(memory_cache()).await?;
    let vendedor = scope(AccessLevel::Vendedor, RowScope::Employee { employee_id: EmployeeId(42) });

    let res = agg.compute(MetricName::VentasNetas, january(), GroupBy::Total, &vendedor, None).await?;
    assert_eq!(res.total, Decimal::new(350, 0));
    assert_eq!(res.bookings, 2);
    assert!(res.origin().iter().all(|f| f.employee_id == EmployeeId(42)));
    Ok(())
}

#[tokio::test]
async fn admin_total_covers_every_booking() -> Result<()> {
    let agg = seeded(memory_cache()).await?;
    let admin = scope(AccessLevel::Admin, RowScope::All);
    let vendedor = |id| scope(AccessLevel::Vendedor, RowScope::Employee { employee_id: EmployeeId(id) });

    let all = agg.compute(MetricName::VentasNetas, january(), GroupBy::Total, &admin, None).await?;
    assert_eq!(all.total, Decimal::new(800, 0));

    // Alcances disjuntos que cubren todo suman el total del administrador.
    let a = agg.compute(MetricName::VentasNetas, january(), GroupBy::Total, &vendedor(42), None).await?;
    let b = agg.compute(MetricName::VentasNetas, january(), GroupBy::Total, &vendedor(43), None).await?;
    assert_eq!(a.total + b.total, all.total);

    let by_employee = agg.compute(MetricName::VentasNetas, january(), GroupBy::Employee, &admin, None).await?;
    assert_eq!(by_employee.row(&GroupKey::Employee(EmployeeId(43))).map(|r| r.value), Some(Decimal::new(450, 0)));
    Ok(())
}

#[tokio::test]
async fn branch_scope_is_a_subset_of_admin() -> Result<()> {
    let agg = seeded(memory_cache()).await?;
    let admin = scope(AccessLevel::Admin, RowScope::All);
    let branch = scope(AccessLevel::DirectorSucursal, RowScope::Branch { branch_id: BranchId(7) });

    let all = agg.compute(MetricName::Reservas, january(), GroupBy::Total, &admin, None).await?;
    let mine = agg.compute(MetricName::Reservas, january(), GroupBy::Total, &branch, None).await?;
    assert!(mine.record_ids.iter().all(|id| all.record_ids.contains(id)));
    assert_eq!(mine.total, Decimal::new(3, 0));
    assert_eq!(mine.currency, None);
    Ok(())
}

#[tokio::test]
async fn widening_the_range_never_lowers_additive_totals() -> Result<()> {
    let agg = seeded(memory_cache()).await?;
    let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
    let nested = [(10, 10), (5, 15), (3, 20), (1, 31)];
    let scopes = [
        scope(AccessLevel::Admin, RowScope::All),
        scope(AccessLevel::DirectorSucursal, RowScope::Branch { branch_id: BranchId(7) }),
        scope(AccessLevel::Vendedor, RowScope::Employee { employee_id: EmployeeId(42) }),
    ];

    for s in &scopes {
        for metric in [MetricName::Reservas, MetricName::VentasNetas, MetricName::Pasajeros] {
            let mut prev_total = Decimal::ZERO;
            let mut prev_ids = Vec::new();
            for (start, end) in nested {
                let range = DateRange::new(d(start), d(end))?;
                let res = agg.compute(metric, range, GroupBy::Total, s, None).await?;
                assert!(res.total >= prev_total, "{metric:?} shrank at {start}..{end} for {}", s.principal_id);
                assert!(prev_ids.iter().all(|id| res.record_ids.contains(id)));
                prev_total = res.total;
                prev_ids = res.record_ids.clone();
            }
        }
    }

    let full = agg.compute(MetricName::Reservas, january(), GroupBy::Total, &scopes[0], None).await?;
    assert_eq!(full.total, Decimal::new(4, 0));
    Ok(())
}

#[tokio::test]
async fn contador_gets_financial_metrics_only() -> Result<()> {
    let agg = seeded(memory_cache()).await?;
    let contador = scope(AccessLevel::Contador, RowScope::All);

    assert!(agg.compute(MetricName::VentasBrutas, january(), GroupBy::Total, &contador, None).await.is_ok());
    let err = agg
        .compute(MetricName::Pasajeros, january(), GroupBy::Total, &contador, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricsError::ColumnRestricted { .. }));
    Ok(())
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() -> Result<()> {
    let cache = memory_cache();
    let agg = seeded(cache.clone()).await?;
    let admin = scope(AccessLevel::Admin, RowScope::All);

    let first = agg.compute(MetricName::VentasNetas, january(), GroupBy::Branch, &admin, None).await?;
    let second = agg.compute(MetricName::VentasNetas, january(), GroupBy::Branch, &admin, None).await?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len().await, 1);

    // Otro alcance, otra entrada.
    let branch = scope(AccessLevel::DirectorSucursal, RowScope::Branch { branch_id: BranchId(8) });
    let other = agg.compute(MetricName::VentasNetas, january(), GroupBy::Branch, &branch, None).await?;
    assert_eq!(other.total, Decimal::new(50, 0));
    assert_eq!(cache.len().await, 2);
    Ok(())
}

/// Caché siempre caída.
struct BrokenCache;

#[async_trait]
impl MetricCache for BrokenCache {
    async fn get(&self, _key: &MetricKey) -> Result<Option<Arc<MetricResult>>> {
        Err(anyhow!("cache backend down"))
    }
    async fn ticket(&self) -> Result<CacheTicket> {
        Err(anyhow!("cache backend down"))
    }
    async fn put_if_fresh(&self, _key: MetricKey, _value: Arc<MetricResult>, _ticket: CacheTicket) -> Result<bool> {
        Err(anyhow!("cache backend down"))
    }
    async fn invalidate_dates(&self, _dates: &[NaiveDate]) -> Result<usize> {
        Err(anyhow!("cache backend down"))
    }
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
    async fn len(&self) -> usize {
        0
    }
}

#[tokio::test]
async fn cache_failure_degrades_to_recomputation() -> Result<()> {
    let agg = seeded(Arc::new(BrokenCache)).await?;
    let admin = scope(AccessLevel::Admin, RowScope::All);
    let res = agg.compute(MetricName::VentasNetas, january(), GroupBy::Total, &admin, None).await?;
    assert_eq!(res.total, Decimal::new(800, 0));
    Ok(())
}

#[tokio::test]
async fn mixed_currencies_use_the_supplied_snapshot() -> Result<()> {
    let store = Arc::new(InMemoryBookingStore::new());
    store.append(booking(42, 7, 5, 100, "EUR")).await?;
    store.append(booking(42, 7, 6, 200, "usd")).await?;
    let agg = MetricsAggregator::new(store, memory_cache(), &ReportingConfig::default());
    let admin = scope(AccessLevel::Admin, RowScope::All);

    let err = agg
        .compute(MetricName::VentasNetas, january(), GroupBy::Total, &admin, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricsError::MissingExchangeRate { .. }));

    let snap = ExchangeRateSnapshot::new("fx-2024-01-31", "EUR", Utc::now()).with_rate("USD", Decimal::new(92, 2));
    let res = agg.compute(MetricName::VentasNetas, january(), GroupBy::Total, &admin, Some(&snap)).await?;
    assert_eq!(res.total, Decimal::new(284, 0));
    assert_eq!(res.currency.as_deref(), Some("EUR"));
    assert_eq!(res.rate_snapshot.as_deref(), Some("fx-2024-01-31"));

    // Conteos no necesitan conversión.
    let count = agg.compute(MetricName::Reservas, january(), GroupBy::Total, &admin, None).await?;
    assert_eq!(count.total, Decimal::new(2, 0));
    Ok(())
}
