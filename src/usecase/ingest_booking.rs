// src/usecase/ingest_booking.rs
//! Ingesta de reservas vendidas.
//!
//! Valida el lote completo antes de escribir, agrega al almacén (sólo anexar) y
//! avisa a los oyentes (la caché de métricas) con las fechas afectadas. El lote
//! se escribe entero o no se escribe: un id repetido, en el lote o en el
//! almacén, lo rechaza sin dejar registros a medias.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{EngineError, IngestError, ScopeError};
use crate::domain::model::booking::BookingRecord;
use crate::repository::booking_store::{BatchOutcome, BookingStore, IngestionListener};
use crate::service::scope_resolver::ScopeResolver;
use crate::telemetry::metrics as telemetry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub accepted: Vec<Uuid>,
    /// Fechas cuyas entradas de caché se invalidaron.
    pub affected_dates: Vec<NaiveDate>,
}

pub struct IngestBookingUseCase {
    store: Arc<dyn BookingStore>,
    resolver: ScopeResolver,
    listeners: Vec<Arc<dyn IngestionListener>>,
}

impl IngestBookingUseCase {
    pub fn new(store: Arc<dyn BookingStore>, resolver: ScopeResolver) -> Self {
        Self { store, resolver, listeners: Vec::new() }
    }

    pub fn with_listener(mut self, listener: Arc<dyn IngestionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn execute(&self, principal_id: &str, records: Vec<BookingRecord>) -> Result<IngestSummary, EngineError> {
        let scope = self.resolver.resolve_id(principal_id)?;
        scope.ensure_writable()?;

        let mut seen = HashSet::new();
        for record in &records {
            record.validate()?;
            if !seen.insert(record.id) {
                return Err(IngestError::DuplicateRecord(record.id).into());
            }
            // Sólo se escriben filas que el principal podría leer.
            if !scope.matches(record) {
                return Err(ScopeError::Forbidden {
                    principal: scope.principal_id.clone(),
                    level: scope.level,
                    action: format!("ingest booking {} outside its scope", record.id),
                }
                .into());
            }
        }

        let accepted: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let affected_dates: Vec<NaiveDate> = records
            .iter()
            .map(BookingRecord::sale_date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        match self.store.append_batch(records).await {
            Ok(BatchOutcome::Inserted(n)) => telemetry::record_bookings_ingested(n),
            Ok(BatchOutcome::Duplicate(id)) => {
                warn!(%id, "booking batch rejected");
                return Err(IngestError::DuplicateRecord(id).into());
            }
            Err(e) => return Err(IngestError::Store(format!("{e:#}")).into()),
        }

        if !affected_dates.is_empty() {
            for listener in &self.listeners {
                if let Err(e) = listener.on_ingested(&affected_dates).await {
                    warn!(error = %e, "ingestion listener failed");
                }
            }
        }

        info!(accepted = accepted.len(), dates = affected_dates.len(), "bookings ingested");
        Ok(IngestSummary { accepted, affected_dates })
    }
}
