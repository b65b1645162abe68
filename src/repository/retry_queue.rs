// src/repository/retry_queue.rs
//! Cola compartida de `DeliveryAttempt` pendientes.
//!
//! - Una entrada por (alerta, canal).
//! - `claim_ready` reclama de forma exclusiva: una entrada reclamada no vuelve
//!   a entregarse a otro worker hasta `complete`, `reschedule` o `release`
//!   (como mucho un intento en vuelo por entrega).
//! - Orden de reclamo: severidad descendente, prioridad de canal y hora del
//!   próximo intento. Un aviso crítico nunca espera detrás de avisos menores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::model::channel::ChannelId;
use crate::domain::model::severity::Severity;
use crate::telemetry::metrics as telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    pub alert_id: Uuid,
    pub channel: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub alert_id: Uuid,
    pub channel: ChannelId,
    pub severity: Severity,
    /// Prioridad configurada del canal (menor = antes).
    pub channel_priority: u8,
    pub next_attempt_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn key(&self) -> QueueKey {
        QueueKey { alert_id: self.alert_id, channel: self.channel }
    }

    /// Orden de servicio entre entradas listas.
    pub fn service_order(&self, other: &Self) -> Ordering {
        other
            .severity
            .cmp(&self.severity)
            .then(self.channel_priority.cmp(&other.channel_priority))
            .then(self.next_attempt_at.cmp(&other.next_attempt_at))
            .then(self.enqueued_at.cmp(&other.enqueued_at))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryQueueStats {
    pub queued: usize,
    pub ready: usize,
    pub in_flight: usize,
}

#[async_trait]
pub trait RetryQueue: Send + Sync + 'static {
    /// Encola o reemplaza la entrada (si no está reclamada).
    async fn enqueue(&self, entry: QueueEntry) -> anyhow::Result<()>;

    /// Reclama hasta `limit` entradas listas en `now`, en orden de servicio.
    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<QueueEntry>>;

    /// Libera el reclamo y vuelve a encolar con la nueva hora.
    async fn reschedule(&self, key: QueueKey, next_attempt_at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Libera el reclamo sin cambios (p.ej. cuota del canal agotada).
    async fn release(&self, key: QueueKey) -> anyhow::Result<()>;

    /// Termina la entrada reclamada (entregada, fallida o expirada).
    async fn complete(&self, key: QueueKey) -> anyhow::Result<()>;

    /// Elimina todas las entradas de una alerta. Devuelve cuántas había en cola.
    async fn remove_alert(&self, alert_id: Uuid) -> anyhow::Result<usize>;

    async fn stats(&self, now: DateTime<Utc>) -> anyhow::Result<RetryQueueStats>;
}

#[derive(Default)]
struct Inner {
    entries: HashMap<QueueKey, QueueEntry>,
    in_flight: HashMap<QueueKey, QueueEntry>,
    /// Alertas retiradas mientras tenían entradas en vuelo.
    cancelled: HashSet<QueueKey>,
}

#[derive(Default)]
pub struct InMemoryRetryQueue {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn enqueue(&self, entry: QueueEntry) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        let key = entry.key();
        if inner.in_flight.contains_key(&key) {
            anyhow::bail!("delivery {}/{} is in flight", key.alert_id, key.channel);
        }
        inner.entries.insert(key, entry);
        telemetry::record_retry_queue_depth(inner.entries.len());
        Ok(())
    }

    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<QueueEntry>> {
        let mut inner = self.inner.write().await;
        let mut ready: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|e| e.next_attempt_at <= now)
            .cloned()
            .collect();
        ready.sort_by(|a, b| a.service_order(b));
        ready.truncate(limit);

        for e in &ready {
            let key = e.key();
            inner.entries.remove(&key);
            inner.in_flight.insert(key, e.clone());
        }
        telemetry::record_retry_queue_depth(inner.entries.len());
        Ok(ready)
    }

    async fn reschedule(&self, key: QueueKey, next_attempt_at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        let Some(mut entry) = inner.in_flight.remove(&key) else {
            anyhow::bail!("delivery {}/{} is not claimed", key.alert_id, key.channel);
        };
        if inner.cancelled.remove(&key) {
            return Ok(());
        }
        entry.next_attempt_at = next_attempt_at;
        inner.entries.insert(key, entry);
        telemetry::record_retry_queue_depth(inner.entries.len());
        Ok(())
    }

    async fn release(&self, key: QueueKey) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.in_flight.remove(&key) {
            if !inner.cancelled.remove(&key) {
                inner.entries.insert(key, entry);
            }
        }
        Ok(())
    }

    async fn complete(&self, key: QueueKey) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.in_flight.remove(&key);
        inner.cancelled.remove(&key);
        Ok(())
    }

    async fn remove_alert(&self, alert_id: Uuid) -> anyhow::Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|k, _| k.alert_id != alert_id);
        let removed = before - inner.entries.len();
        let flying: Vec<QueueKey> = inner.in_flight.keys().filter(|k| k.alert_id == alert_id).copied().collect();
        inner.cancelled.extend(flying);
        telemetry::record_retry_queue_depth(inner.entries.len());
        Ok(removed)
    }

    async fn stats(&self, now: DateTime<Utc>) -> anyhow::Result<RetryQueueStats> {
        let inner = self.inner.read().await;
        Ok(RetryQueueStats {
            queued: inner.entries.len(),
            ready: inner.entries.values().filter(|e| e.next_attempt_at <= now).count(),
            in_flight: inner.in_flight.len(),
        })
    }
}
