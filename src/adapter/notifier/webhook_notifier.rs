// adapter/notifier/webhook_notifier.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use super::notifier_registry::{AlertNotification, ChannelAdapter, DeliveryOutcome};
use crate::domain::model::alert::AlertEvent;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::delivery_status::RecipientRef;

/// Envío JSON genérico por HTTP POST.
///
/// Sirve al canal `webhook` y a cualquier canal cuyo proveedor acepte un
/// webhook entrante (p.ej. Slack). Si la dirección del destinatario es una URL
/// se usa tal cual; si no, se envía al endpoint del canal.
pub struct WebhookNotifier {
    channel: ChannelId,
    endpoint: Option<String>,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(channel: ChannelId, endpoint: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { channel, endpoint, client })
    }

    fn target<'a>(&'a self, recipient: &'a RecipientRef) -> Option<&'a str> {
        if recipient.address.starts_with("http://") || recipient.address.starts_with("https://") {
            Some(recipient.address.as_str())
        } else {
            self.endpoint.as_deref()
        }
    }
}

/// 4xx (salvo 408 y 429) es rechazo permanente; el resto se reintenta.
fn classify(status: StatusCode) -> DeliveryOutcome {
    if status.is_success() {
        DeliveryOutcome::Accepted
    } else if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT && status != StatusCode::TOO_MANY_REQUESTS {
        DeliveryOutcome::Rejected(format!("endpoint answered {status}"))
    } else {
        DeliveryOutcome::Error(format!("endpoint answered {status}"))
    }
}

#[async_trait]
impl ChannelAdapter for WebhookNotifier {
    fn channel(&self) -> ChannelId {
        self.channel
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    async fn send(&self, event: &AlertEvent, channel: ChannelId, recipient: &RecipientRef) -> DeliveryOutcome {
        let Some(url) = self.target(recipient) else {
            return DeliveryOutcome::Rejected(format!("no {channel} endpoint for recipient {}", recipient.principal_id));
        };
        let payload = AlertNotification::from_event(event, recipient);
        match self.client.post(url).json(&payload).send().await {
            Ok(resp) => {
                let outcome = classify(resp.status());
                debug!(alert_id = %event.id, channel = %channel, status = %resp.status(), "webhook answered");
                outcome
            }
            Err(e) => {
                warn!(alert_id = %event.id, channel = %channel, error = %e, "webhook send error");
                DeliveryOutcome::Error(e.to_string())
            }
        }
    }
}
