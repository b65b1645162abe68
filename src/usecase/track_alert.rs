// src/usecase/track_alert.rs
//! Consulta de alertas y confirmación de entrega por parte del destinatario.
//!
//! Una alerta sólo es visible para sus destinatarios y para alcances sin
//! restricción de filas; para el resto responde como inexistente.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::error::{DispatchError, EngineError};
use crate::domain::model::alert::AlertEvent;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::scope_filter::ScopeFilter;
use crate::service::notification_dispatcher::NotificationDispatcher;
use crate::service::scope_resolver::ScopeResolver;

pub struct TrackAlertUseCase {
    dispatcher: Arc<NotificationDispatcher>,
    resolver: ScopeResolver,
}

fn visible_to(alert: &AlertEvent, scope: &ScopeFilter) -> bool {
    scope.rows.is_unrestricted()
        || alert
            .deliveries
            .values()
            .any(|d| d.recipients.iter().any(|r| r.recipient.principal_id == scope.principal_id))
}

impl TrackAlertUseCase {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, resolver: ScopeResolver) -> Self {
        Self { dispatcher, resolver }
    }

    pub async fn get(&self, principal_id: &str, alert_id: Uuid) -> Result<AlertEvent, EngineError> {
        let scope = self.resolver.resolve_id(principal_id)?;
        let alert = self.dispatcher.get_alert(alert_id).await?;
        if !visible_to(&alert, &scope) {
            return Err(DispatchError::AlertNotFound(alert_id).into());
        }
        Ok(alert)
    }

    /// El principal confirma la recepción en un canal; sólo puede confirmar la propia.
    #[instrument(skip(self))]
    pub async fn confirm(&self, principal_id: &str, alert_id: Uuid, channel: ChannelId) -> Result<AlertEvent, EngineError> {
        self.resolver.resolve_id(principal_id)?.ensure_writable()?;
        let alert = self.dispatcher.confirm_delivery(alert_id, channel, principal_id, Utc::now()).await?;
        info!(alert_id = %alert_id, channel = %channel, state = alert.state.as_str(), "delivery confirmed");
        Ok(alert)
    }
}
