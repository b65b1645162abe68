// src/service/event_deduplicator.rs
//! Ventana de supresión de alertas.
//!
//! - Clave: `AlertTrigger::dedup_key()` (regla, alcance, métrica, periodo).
//! - La ventana se mide desde el primer disparo: repeticiones dentro de ella se
//!   pliegan en la alerta existente; la primera después abre una alerta nueva.
//! - Backend intercambiable (en memoria por defecto) con check-and-set atómico.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionDecision {
    /// No había entrada vigente; `alert_id` queda registrado como dueño de la ventana.
    Fresh,
    /// Ya existe una alerta para la clave dentro de la ventana.
    Suppressed { alert_id: Uuid },
}

#[async_trait]
pub trait SuppressionBackend: Send + Sync + 'static {
    /// Si hay entrada vigente en `now` la devuelve; si no, registra `alert_id`
    /// hasta `expires_at`.
    async fn check_and_set(
        &self,
        key: &str,
        alert_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<SuppressionDecision>;

    /// Quita la entrada si sigue perteneciendo a `alert_id`.
    async fn release(&self, key: &str, alert_id: Uuid) -> anyhow::Result<()>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone)]
struct SuppressionEntry {
    alert_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemorySuppressionBackend {
    inner: RwLock<HashMap<String, SuppressionEntry>>,
}

impl InMemorySuppressionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuppressionBackend for InMemorySuppressionBackend {
    async fn check_and_set(
        &self,
        key: &str,
        alert_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<SuppressionDecision> {
        let mut map = self.inner.write().await;
        if let Some(entry) = map.get(key) {
            if entry.expires_at > now {
                return Ok(SuppressionDecision::Suppressed { alert_id: entry.alert_id });
            }
        }
        map.insert(key.to_string(), SuppressionEntry { alert_id, expires_at });
        Ok(SuppressionDecision::Fresh)
    }

    async fn release(&self, key: &str, alert_id: Uuid) -> anyhow::Result<()> {
        let mut map = self.inner.write().await;
        if map.get(key).is_some_and(|e| e.alert_id == alert_id) {
            map.remove(key);
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, e| e.expires_at > now);
        Ok(before - map.len())
    }
}

pub struct EventDeduplicator {
    backend: Arc<dyn SuppressionBackend>,
    window: Duration,
}

impl EventDeduplicator {
    pub fn new(backend: Arc<dyn SuppressionBackend>, window: std::time::Duration) -> Self {
        let window = Duration::from_std(window).unwrap_or_else(|_| Duration::minutes(15));
        Self { backend, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check_and_mark(&self, key: &str, candidate: Uuid, now: DateTime<Utc>) -> anyhow::Result<SuppressionDecision> {
        self.backend.check_and_set(key, candidate, now, now + self.window).await
    }

    pub async fn release(&self, key: &str, alert_id: Uuid) -> anyhow::Result<()> {
        self.backend.release(key, alert_id).await
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        self.backend.purge_expired(now).await
    }
}
