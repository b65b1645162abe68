// src/repository/booking_store.rs
//! Almacén append-only de `BookingRecord`.
//!
//! Los registros se indexan por fecha de venta para que el agregador escanee
//! sólo los días del rango pedido. Nunca se modifican ni se borran.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::model::booking::BookingRecord;
use crate::domain::model::metric::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// El id ya existía; el registro original se conserva intacto.
    Duplicate,
}

#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    async fn append(&self, record: BookingRecord) -> anyhow::Result<AppendOutcome>;

    /// Todo o nada: si algún id ya existe no se escribe ningún registro del lote
    /// y se devuelve ese id.
    async fn append_batch(&self, records: Vec<BookingRecord>) -> anyhow::Result<BatchOutcome>;

    /// Registros cuya fecha de venta cae en `range`, en orden de fecha.
    async fn scan(&self, range: &DateRange) -> anyhow::Result<Vec<Arc<BookingRecord>>>;

    async fn count(&self) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Inserted(usize),
    Duplicate(Uuid),
}

/// Notificado tras cada ingesta con las fechas afectadas.
#[async_trait]
pub trait IngestionListener: Send + Sync + 'static {
    async fn on_ingested(&self, dates: &[NaiveDate]) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Inner {
    by_date: BTreeMap<NaiveDate, Vec<Arc<BookingRecord>>>,
    ids: HashSet<Uuid>,
}

#[derive(Default)]
pub struct InMemoryBookingStore {
    inner: RwLock<Inner>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn append(&self, record: BookingRecord) -> anyhow::Result<AppendOutcome> {
        let mut inner = self.inner.write().await;
        if !inner.ids.insert(record.id) {
            return Ok(AppendOutcome::Duplicate);
        }
        inner
            .by_date
            .entry(record.sale_date())
            .or_default()
            .push(Arc::new(record));
        Ok(AppendOutcome::Inserted)
    }

    async fn append_batch(&self, records: Vec<BookingRecord>) -> anyhow::Result<BatchOutcome> {
        let mut inner = self.inner.write().await;
        let mut batch = HashSet::with_capacity(records.len());
        for r in &records {
            if inner.ids.contains(&r.id) || !batch.insert(r.id) {
                return Ok(BatchOutcome::Duplicate(r.id));
            }
        }
        let n = records.len();
        for record in records {
            inner.ids.insert(record.id);
            inner
                .by_date
                .entry(record.sale_date())
                .or_default()
                .push(Arc::new(record));
        }
        Ok(BatchOutcome::Inserted(n))
    }

    async fn scan(&self, range: &DateRange) -> anyhow::Result<Vec<Arc<BookingRecord>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_date
            .range(range.start()..=range.end())
            .flat_map(|(_, records)| records.iter().cloned())
            .collect())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.inner.read().await.ids.len())
    }
}
