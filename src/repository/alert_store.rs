// src/repository/alert_store.rs
//! Persistencia de `AlertEvent`.
//!
//! Las actualizaciones se hacen con un cierre aplicado bajo el lock de
//! escritura, de modo que dos workers que terminan canales distintos de la
//! misma alerta no se pisan.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::model::alert::{AlertEvent, AlertState};

pub type AlertMutation = Box<dyn FnOnce(&mut AlertEvent) + Send>;

#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub states: Option<Vec<AlertState>>,
    pub rule_id: Option<String>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait AlertStore: Send + Sync + 'static {
    async fn insert(&self, alert: AlertEvent) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<AlertEvent>>;

    /// Aplica `mutation` de forma atómica y devuelve la alerta resultante.
    async fn update(&self, id: Uuid, mutation: AlertMutation) -> anyhow::Result<Option<AlertEvent>>;

    /// Ids que cumplen el filtro, del más antiguo al más reciente.
    async fn query_ids(&self, query: &AlertQuery) -> anyhow::Result<Vec<Uuid>>;

    /// Elimina alertas terminales cerradas antes de `cutoff`.
    async fn purge_closed_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;
}

#[derive(Default)]
pub struct InMemoryAlertStore {
    items: Arc<RwLock<HashMap<Uuid, AlertEvent>>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn insert(&self, alert: AlertEvent) -> anyhow::Result<()> {
        let mut items = self.items.write().await;
        if items.contains_key(&alert.id) {
            anyhow::bail!("alert {} already stored", alert.id);
        }
        items.insert(alert.id, alert);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<AlertEvent>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, mutation: AlertMutation) -> anyhow::Result<Option<AlertEvent>> {
        let mut items = self.items.write().await;
        Ok(items.get_mut(&id).map(|alert| {
            mutation(alert);
            alert.clone()
        }))
    }

    async fn query_ids(&self, query: &AlertQuery) -> anyhow::Result<Vec<Uuid>> {
        let items = self.items.read().await;
        let mut found: Vec<&AlertEvent> = items
            .values()
            .filter(|a| query.states.as_ref().map_or(true, |s| s.contains(&a.state)))
            .filter(|a| query.rule_id.as_ref().map_or(true, |r| &a.rule_id == r))
            .filter(|a| query.created_before.map_or(true, |t| a.created_at < t))
            .collect();
        found.sort_by_key(|a| (a.created_at, a.id));
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(found.into_iter().take(limit).map(|a| a.id).collect())
    }

    async fn purge_closed_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, a| !(a.state.is_terminal() && a.closed_at.is_some_and(|t| t < cutoff)));
        Ok(before - items.len())
    }
}
