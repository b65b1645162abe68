// src/repository/metric_cache.rs
//! Caché de `MetricResult` con TTL e invalidación por fecha.
//!
//! La caché es una optimización: quien la usa degrada a recálculo ante
//! cualquier error. Las escrituras son atómicas: el resultado completo se
//! publica con `put_if_fresh` o se descarta. Cada ingesta avanza una secuencia
//! y marca sus fechas; un cálculo iniciado antes de una ingesta que solapa su
//! rango no llega a publicarse.
//!
//! `purge_expired` olvida las marcas anteriores a la purga previa y sube un
//! suelo: un ticket por debajo del suelo ya no se puede comparar fecha a fecha
//! y se trata como viejo.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::model::metric::{DateRange, GroupBy, MetricName, MetricResult};
use crate::repository::booking_store::IngestionListener;
use crate::telemetry::metrics as telemetry;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub metric: MetricName,
    pub scope_hash: String,
    pub range: DateRange,
    pub group_by: GroupBy,
    pub rate_snapshot: Option<String>,
}

/// Marca de secuencia tomada antes de calcular.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheTicket(pub u64);

#[async_trait]
pub trait MetricCache: Send + Sync + 'static {
    async fn get(&self, key: &MetricKey) -> anyhow::Result<Option<Arc<MetricResult>>>;

    async fn ticket(&self) -> anyhow::Result<CacheTicket>;

    /// Publica `value` salvo que una ingesta posterior a `ticket` haya tocado su rango.
    async fn put_if_fresh(&self, key: MetricKey, value: Arc<MetricResult>, ticket: CacheTicket) -> anyhow::Result<bool>;

    /// Invalida exactamente las entradas cuyo rango contiene alguna de las fechas.
    async fn invalidate_dates(&self, dates: &[NaiveDate]) -> anyhow::Result<usize>;

    async fn purge_expired(&self) -> anyhow::Result<usize>;

    async fn len(&self) -> usize;
}

struct CacheEntry {
    value: Arc<MetricResult>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<MetricKey, CacheEntry>,
    seq: u64,
    /// Última secuencia de invalidación por fecha.
    touched: BTreeMap<NaiveDate, u64>,
    /// Las marcas con secuencia <= `floor` ya se olvidaron.
    floor: u64,
    seq_at_last_purge: u64,
}

pub struct InMemoryMetricCache {
    ttl: Duration,
    inner: RwLock<Inner>,
}

impl InMemoryMetricCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: RwLock::new(Inner::default()) }
    }
}

#[async_trait]
impl MetricCache for InMemoryMetricCache {
    async fn get(&self, key: &MetricKey) -> anyhow::Result<Option<Arc<MetricResult>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn ticket(&self) -> anyhow::Result<CacheTicket> {
        Ok(CacheTicket(self.inner.read().await.seq))
    }

    async fn put_if_fresh(&self, key: MetricKey, value: Arc<MetricResult>, ticket: CacheTicket) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        let stale = ticket.0 < inner.floor
            || inner
                .touched
                .range(key.range.start()..=key.range.end())
                .any(|(_, seq)| *seq > ticket.0);
        if stale {
            return Ok(false);
        }
        let expires_at = Instant::now() + self.ttl;
        inner.entries.insert(key, CacheEntry { value, expires_at });
        Ok(true)
    }

    async fn invalidate_dates(&self, dates: &[NaiveDate]) -> anyhow::Result<usize> {
        if dates.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let seq = inner.seq;
        for d in dates {
            inner.touched.insert(*d, seq);
        }
        let before = inner.entries.len();
        inner
            .entries
            .retain(|k, _| !dates.iter().any(|d| k.range.contains(*d)));
        let removed = before - inner.entries.len();
        telemetry::record_cache_invalidations(removed);
        Ok(removed)
    }

    async fn purge_expired(&self) -> anyhow::Result<usize> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.expires_at > now);

        let floor = inner.seq_at_last_purge;
        inner.touched.retain(|_, seq| *seq > floor);
        inner.floor = floor;
        inner.seq_at_last_purge = inner.seq;
        Ok(before - inner.entries.len())
    }

    async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

/// Conecta la ingesta con la invalidación de la caché.
pub struct CacheInvalidator {
    cache: Arc<dyn MetricCache>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn MetricCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl IngestionListener for CacheInvalidator {
    async fn on_ingested(&self, dates: &[NaiveDate]) -> anyhow::Result<()> {
        self.cache.invalidate_dates(dates).await?;
        Ok(())
    }
}
