// adapter/notifier/in_app_notifier.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::notifier_registry::{ChannelAdapter, DeliveryOutcome};
use crate::domain::model::alert::AlertEvent;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::delivery_status::RecipientRef;
use crate::domain::model::severity::Severity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboxItem {
    pub alert_id: Uuid,
    pub severity: Severity,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

/// Bandeja de notificaciones dentro de la aplicación, por principal.
///
/// El cliente confirma la lectura (`confirm_delivery`), así que el adaptador
/// declara confirmación.
#[derive(Default)]
pub struct InAppNotifier {
    max_per_inbox: usize,
    inboxes: RwLock<HashMap<String, Vec<InboxItem>>>,
}

impl InAppNotifier {
    pub fn new(max_per_inbox: usize) -> Self {
        Self { max_per_inbox: max_per_inbox.max(1), inboxes: RwLock::new(HashMap::new()) }
    }

    pub async fn inbox(&self, principal_id: &str) -> Vec<InboxItem> {
        self.inboxes.read().await.get(principal_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChannelAdapter for InAppNotifier {
    fn channel(&self) -> ChannelId {
        ChannelId::InApp
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn confirms_delivery(&self) -> bool {
        true
    }

    async fn send(&self, event: &AlertEvent, _channel: ChannelId, recipient: &RecipientRef) -> DeliveryOutcome {
        let mut inboxes = self.inboxes.write().await;
        let inbox = inboxes.entry(recipient.principal_id.clone()).or_default();
        // Un reintento no duplica la entrada.
        if !inbox.iter().any(|i| i.alert_id == event.id) {
            inbox.push(InboxItem {
                alert_id: event.id,
                severity: event.severity,
                message: event.message.clone(),
                received_at: Utc::now(),
            });
        }
        if inbox.len() > self.max_per_inbox {
            let overflow = inbox.len() - self.max_per_inbox;
            inbox.drain(..overflow);
        }
        DeliveryOutcome::Accepted
    }
}
