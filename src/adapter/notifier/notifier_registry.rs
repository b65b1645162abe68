// adapter/notifier/notifier_registry.rs

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::model::alert::AlertEvent;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::delivery_status::{RecipientOutcome, RecipientRef};

/// Respuesta de un adaptador a un envío.
///
/// `Accepted` significa "intentado": la entrega sólo se da por hecha con la
/// confirmación del adaptador o, si no confirma, tras el plazo configurado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted,
    /// Rechazo permanente (dirección inválida, destinatario dado de baja...).
    Rejected(String),
    /// Fallo transitorio; se reintenta según la política del canal.
    Error(String),
}

impl DeliveryOutcome {
    pub fn into_recipient_outcome(self, confirms: bool) -> RecipientOutcome {
        match self {
            DeliveryOutcome::Accepted => RecipientOutcome::Accepted { confirms },
            DeliveryOutcome::Rejected(m) => RecipientOutcome::Rejected(m),
            DeliveryOutcome::Error(m) => RecipientOutcome::Error(m),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Accepted => "accepted",
            DeliveryOutcome::Rejected(_) => "rejected",
            DeliveryOutcome::Error(_) => "error",
        }
    }
}

/// Interfaz común de los canales. El formato (HTML, 160 caracteres, bloques de
/// Slack) es responsabilidad del adaptador.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> ChannelId;

    /// Versión del adaptador, para control de reemplazos.
    fn version(&self) -> &'static str;

    /// `true` si el adaptador informa la entrega vía `confirm_delivery`.
    fn confirms_delivery(&self) -> bool {
        false
    }

    async fn send(&self, event: &AlertEvent, channel: ChannelId, recipient: &RecipientRef) -> DeliveryOutcome;
}

/// Vista serializable de una alerta para adaptadores que envían JSON.
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification<'a> {
    pub alert_id: String,
    pub severity: &'a str,
    pub title: String,
    pub body: &'a str,
    pub metric: &'a str,
    pub period: &'a str,
    pub scope: &'a str,
    pub observed: Option<f64>,
    pub recipient: &'a str,
    pub created_at: String,
}

impl<'a> AlertNotification<'a> {
    pub fn from_event(event: &'a AlertEvent, recipient: &'a RecipientRef) -> Self {
        Self {
            alert_id: event.id.to_string(),
            severity: event.severity.as_str(),
            title: format!("[{}] {} ({})", event.severity, event.metric, event.period),
            body: &event.message,
            metric: &event.metric,
            period: &event.period,
            scope: &event.scope_key,
            observed: event.observed,
            recipient: &recipient.principal_id,
            created_at: event.created_at.to_rfc3339(),
        }
    }
}

/// Registro de adaptadores por canal.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<ChannelId, Arc<dyn ChannelAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un adaptador. Rechaza versiones más antiguas que la registrada.
    pub async fn register_adapter(&self, adapter: Arc<dyn ChannelAdapter>) -> Result<(), String> {
        let mut adapters = self.adapters.write().await;
        let channel = adapter.channel();

        if let Some(existing) = adapters.get(&channel) {
            if existing.version() > adapter.version() {
                let msg = format!(
                    "adapter version {} older than existing {} for channel {}",
                    adapter.version(),
                    existing.version(),
                    channel
                );
                warn!("{}", msg);
                return Err(msg);
            }
        }

        info!(channel = %channel, version = adapter.version(), "registering channel adapter");
        adapters.insert(channel, adapter);
        Ok(())
    }

    pub async fn get(&self, channel: ChannelId) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.read().await.get(&channel).cloned()
    }

    pub async fn channels(&self) -> Vec<ChannelId> {
        let mut out: Vec<ChannelId> = self.adapters.read().await.keys().copied().collect();
        out.sort();
        out
    }
}
