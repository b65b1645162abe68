// src/service/metrics_aggregator.rs
//! Agregador de métricas con alcance.
//!
//! Flujo de `compute`:
//! 1. máscara de columnas del alcance;
//! 2. caché (un fallo de caché degrada a recálculo, nunca falla la petición);
//! 3. escaneo del rango + agregación en el pool bloqueante, bajo timeout;
//! 4. publicación atómica con `put_if_fresh`.
//!
//! Todos los importes se suman en `Decimal`. Una agregación con varias monedas
//! exige una `ExchangeRateSnapshot` registrada.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::config::app_config::ReportingConfig;
use crate::domain::error::MetricsError;
use crate::domain::model::booking::BookingRecord;
use crate::domain::model::currency::{normalize_currency, ExchangeRateSnapshot};
use crate::domain::model::metric::{
    CommissionLevel, DateRange, GroupBy, GroupKey, MetricName, MetricResult, MetricRow,
};
use crate::domain::model::scope_filter::{OrgFacts, ScopeFilter};
use crate::repository::booking_store::BookingStore;
use crate::repository::metric_cache::{CacheTicket, MetricCache, MetricKey};
use crate::telemetry::metrics as telemetry;

pub struct MetricsAggregator {
    store: Arc<dyn BookingStore>,
    cache: Arc<dyn MetricCache>,
    default_currency: String,
    latency_target: Duration,
    timeout: Duration,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn BookingStore>, cache: Arc<dyn MetricCache>, cfg: &ReportingConfig) -> Self {
        Self {
            store,
            cache,
            default_currency: normalize_currency(&cfg.currency),
            latency_target: cfg.latency_target(),
            timeout: cfg.timeout(),
        }
    }

    pub fn cache(&self) -> Arc<dyn MetricCache> {
        self.cache.clone()
    }

    #[instrument(
        skip(self, scope, rates),
        fields(metric = %metric, range = %range, group_by = %group_by, scope = %scope.describe())
    )]
    pub async fn compute(
        &self,
        metric: MetricName,
        range: DateRange,
        group_by: GroupBy,
        scope: &ScopeFilter,
        rates: Option<&ExchangeRateSnapshot>,
    ) -> Result<Arc<MetricResult>, MetricsError> {
        let started = Instant::now();
        ensure_columns(metric, scope)?;

        let key = MetricKey {
            metric,
            scope_hash: scope.cache_key(),
            range,
            group_by,
            rate_snapshot: rates.map(|r| r.id.clone()),
        };
        let label = metric.to_string();

        match self.cache.get(&key).await {
            Ok(Some(hit)) => {
                telemetry::record_cache_hit(&label);
                return Ok(hit);
            }
            Ok(None) => telemetry::record_cache_miss(&label),
            Err(e) => {
                telemetry::record_cache_error("get");
                warn!(error = %e, "metric cache unavailable, recomputing");
            }
        }

        // Ticket antes de leer: una ingesta posterior invalida esta publicación.
        let ticket: Option<CacheTicket> = match self.cache.ticket().await {
            Ok(t) => Some(t),
            Err(e) => {
                telemetry::record_cache_error("ticket");
                warn!(error = %e, "metric cache ticket unavailable, result will not be cached");
                None
            }
        };

        let work = async {
            let records = self.store.scan(&range).await.map_err(|e| store_error(metric, scope, &range, e))?;
            let scope_owned = scope.clone();
            let rates_owned = rates.cloned();
            let default_currency = self.default_currency.clone();
            tokio::task::spawn_blocking(move || {
                aggregate(metric, range, group_by, &scope_owned, &records, rates_owned.as_ref(), &default_currency)
            })
            .await
            .map_err(|e| store_error(metric, scope, &range, e))?
        };

        let result = match tokio::time::timeout(self.timeout, work).await {
            Ok(r) => Arc::new(r?),
            Err(_) => {
                return Err(MetricsError::Timeout {
                    metric: label,
                    scope: scope.describe(),
                    range: range.to_string(),
                })
            }
        };

        if let Some(ticket) = ticket {
            match self.cache.put_if_fresh(key, result.clone(), ticket).await {
                Ok(true) => {}
                Ok(false) => debug!("result superseded by a newer ingestion, not cached"),
                Err(e) => {
                    telemetry::record_cache_error("put");
                    warn!(error = %e, "failed to publish metric result to cache");
                }
            }
        }

        let elapsed = started.elapsed();
        telemetry::record_compute_latency(&label, elapsed);
        if elapsed > self.latency_target {
            warn!(elapsed_ms = elapsed.as_millis() as u64, target_ms = self.latency_target.as_millis() as u64, "report computation over latency target");
        }
        Ok(result)
    }

    /// Serie diaria de `metric` por cada grupo de `partition` (sin caché).
    ///
    /// Alimenta las reglas de anomalía y desviación de pronóstico, que evalúan
    /// cada sucursal, región, etc. por separado.
    #[instrument(skip(self, scope, rates), fields(metric = %metric, range = %range, partition = %partition))]
    pub async fn compute_partitioned(
        &self,
        metric: MetricName,
        range: DateRange,
        partition: GroupBy,
        scope: &ScopeFilter,
        rates: Option<&ExchangeRateSnapshot>,
    ) -> Result<Vec<(GroupKey, MetricResult)>, MetricsError> {
        ensure_columns(metric, scope)?;
        let records = self.store.scan(&range).await.map_err(|e| store_error(metric, scope, &range, e))?;
        let scope_owned = scope.clone();
        let rates_owned = rates.cloned();
        let default_currency = self.default_currency.clone();

        let work = tokio::task::spawn_blocking(move || {
            let mut groups: BTreeMap<GroupKey, Vec<Arc<BookingRecord>>> = BTreeMap::new();
            for r in records.iter().filter(|r| scope_owned.matches(r)) {
                groups.entry(partition.key_for(r)).or_default().push(r.clone());
            }
            groups
                .into_iter()
                .map(|(key, recs)| {
                    aggregate(metric, range, GroupBy::Day, &scope_owned, &recs, rates_owned.as_ref(), &default_currency)
                        .map(|res| (key, res))
                })
                .collect::<Result<Vec<_>, _>>()
        });

        match tokio::time::timeout(self.timeout, work).await {
            Ok(joined) => joined.map_err(|e| store_error(metric, scope, &range, e))?,
            Err(_) => Err(MetricsError::Timeout {
                metric: metric.to_string(),
                scope: scope.describe(),
                range: range.to_string(),
            }),
        }
    }
}

fn ensure_columns(metric: MetricName, scope: &ScopeFilter) -> Result<(), MetricsError> {
    if !metric.allowed_by(scope.columns) {
        return Err(MetricsError::ColumnRestricted {
            metric: metric.to_string(),
            scope: scope.describe(),
        });
    }
    Ok(())
}

fn store_error(metric: MetricName, scope: &ScopeFilter, range: &DateRange, e: impl std::fmt::Display) -> MetricsError {
    MetricsError::Store {
        metric: metric.to_string(),
        scope: scope.describe(),
        range: range.to_string(),
        message: e.to_string(),
    }
}

#[derive(Default)]
struct RowAcc {
    value: Decimal,
    net: Decimal,
    breakdown: BTreeMap<String, Decimal>,
    bookings: u64,
    origin: BTreeSet<OrgFacts>,
}

/// Conversión de importes hacia la moneda del resultado.
enum Conversion<'a> {
    /// Conteos: sin moneda.
    None,
    /// Todos los registros en la misma moneda.
    Native(String),
    Snapshot(&'a ExchangeRateSnapshot),
}

impl Conversion<'_> {
    fn apply(&self, amount: Decimal, currency: &str) -> Result<Decimal, MetricsError> {
        match self {
            Conversion::None | Conversion::Native(_) => Ok(amount),
            Conversion::Snapshot(snap) => snap.convert(amount, currency).ok_or_else(|| {
                MetricsError::MissingExchangeRate {
                    currency: normalize_currency(currency),
                    snapshot: snap.id.clone(),
                }
            }),
        }
    }
}

/// Agregación pura sobre registros ya escaneados. Determinista: mismas
/// entradas, mismo `MetricResult`.
pub fn aggregate(
    metric: MetricName,
    range: DateRange,
    group_by: GroupBy,
    scope: &ScopeFilter,
    records: &[Arc<BookingRecord>],
    rates: Option<&ExchangeRateSnapshot>,
    default_currency: &str,
) -> Result<MetricResult, MetricsError> {
    let visible: Vec<&BookingRecord> = records
        .iter()
        .map(Arc::as_ref)
        .filter(|r| range.contains(r.sale_date()) && scope.matches(r))
        .collect();

    let currencies: BTreeSet<String> = visible.iter().map(|r| normalize_currency(&r.currency)).collect();
    let conversion = if !metric.is_financial() {
        Conversion::None
    } else if let Some(snap) = rates {
        Conversion::Snapshot(snap)
    } else if currencies.len() > 1 {
        let currency = currencies
            .iter()
            .find(|c| **c != normalize_currency(default_currency))
            .cloned()
            .unwrap_or_default();
        return Err(MetricsError::MissingExchangeRate { currency, snapshot: "none".into() });
    } else {
        Conversion::Native(currencies.iter().next().cloned().unwrap_or_else(|| normalize_currency(default_currency)))
    };

    let mut rows: BTreeMap<GroupKey, RowAcc> = BTreeMap::new();
    let mut converted = false;
    for r in &visible {
        let acc = rows.entry(group_by.key_for(r)).or_default();
        if let Conversion::Snapshot(snap) = &conversion {
            converted |= normalize_currency(&r.currency) != snap.base;
        }
        let c = &r.commissions;
        match metric {
            MetricName::VentasNetas => acc.value += conversion.apply(r.net_amount, &r.currency)?,
            MetricName::VentasBrutas => acc.value += conversion.apply(r.gross_amount, &r.currency)?,
            MetricName::Comisiones(level) => {
                let employee = conversion.apply(c.employee, &r.currency)?;
                let third_party = conversion.apply(c.third_party, &r.currency)?;
                let partner = conversion.apply(c.partner, &r.currency)?;
                acc.value += match level {
                    CommissionLevel::All => employee + third_party + partner,
                    CommissionLevel::Employee => employee,
                    CommissionLevel::ThirdParty => third_party,
                    CommissionLevel::Partner => partner,
                };
                if level == CommissionLevel::All {
                    *acc.breakdown.entry("empleado".into()).or_default() += employee;
                    *acc.breakdown.entry("terceros".into()).or_default() += third_party;
                    *acc.breakdown.entry("partner".into()).or_default() += partner;
                }
            }
            MetricName::Pasajeros => {
                let pax = Decimal::from(r.passengers);
                acc.value += pax;
                *acc.breakdown.entry(r.product_type.as_str().to_string()).or_default() += pax;
            }
            MetricName::Reservas => acc.value += Decimal::ONE,
            MetricName::TicketPromedio => acc.net += conversion.apply(r.net_amount, &r.currency)?,
        }
        acc.bookings += 1;
        acc.origin.insert(OrgFacts::from(*r));
    }

    let mut total = Decimal::ZERO;
    let mut total_net = Decimal::ZERO;
    let mut bookings = 0u64;
    let rows: Vec<MetricRow> = rows
        .into_iter()
        .map(|(key, acc)| {
            let value = if metric == MetricName::TicketPromedio {
                average(acc.net, acc.bookings)
            } else {
                acc.value
            };
            total += acc.value;
            total_net += acc.net;
            bookings += acc.bookings;
            MetricRow { key, value, breakdown: acc.breakdown, bookings: acc.bookings, origin: acc.origin }
        })
        .collect();
    if metric == MetricName::TicketPromedio {
        total = average(total_net, bookings);
    }

    let (currency, rate_snapshot) = match conversion {
        Conversion::None => (None, None),
        Conversion::Native(c) => (Some(c), None),
        Conversion::Snapshot(snap) => (Some(snap.base.clone()), converted.then(|| snap.id.clone())),
    };

    let mut record_ids: Vec<_> = visible.iter().map(|r| r.id).collect();
    record_ids.sort();

    Ok(MetricResult {
        metric,
        range,
        group_by,
        currency,
        rate_snapshot,
        scope: scope.describe(),
        rows,
        total,
        bookings,
        record_ids,
    })
}

fn average(sum: Decimal, count: u64) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (sum / Decimal::from(count)).round_dp(2)
}

/// Fechas de venta distintas de un lote, para invalidar la caché.
pub fn affected_dates(records: &[BookingRecord]) -> Vec<NaiveDate> {
    let set: BTreeSet<NaiveDate> = records.iter().map(BookingRecord::sale_date).collect();
    set.into_iter().collect()
}
