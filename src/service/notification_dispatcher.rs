// src/service/notification_dispatcher.rs
//! Despachador de alertas.
//!
//! Responsabilidades:
//! - Suprimir disparos repetidos dentro de la ventana (ver `EventDeduplicator`).
//! - Resolver destinatarios elegibles: sólo principales cuyo alcance cubre los
//!   datos que originaron la alerta.
//! - Encolar un `DeliveryAttempt` por canal y procesar la cola respetando la
//!   cuota de cada canal y su política de reintentos. La cuota se reparte por
//!   destinatario y en orden de severidad: lo que no cabe espera a la próxima
//!   ventana sin gastar intentos.
//! - Cerrar la alerta (DELIVERED, PARTIALLY_DELIVERED, FAILED, EXPIRED).
//!
//! Un canal lento o caído nunca bloquea a los demás: cada (alerta, canal) es una
//! entrada independiente de la cola.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapter::notifier::notifier_registry::AdapterRegistry;
use crate::config::app_config::{AppConfig, DispatcherConfig};
use crate::config::channel_config::ChannelConfig;
use crate::domain::error::DispatchError;
use crate::domain::model::alert::{AlertEvent, AlertState, AlertTrigger};
use crate::domain::model::channel::ChannelId;
use crate::domain::model::delivery_status::{DeliveryAttempt, DeliveryState, RecipientRef};
use crate::repository::alert_store::{AlertQuery, AlertStore};
use crate::repository::retry_queue::{QueueEntry, RetryQueue};
use crate::service::event_deduplicator::{EventDeduplicator, SuppressionDecision};
use crate::service::rate_limiter::ChannelRateLimiter;
use crate::service::scope_resolver::{EligibleRecipient, ScopeResolver};
use crate::telemetry::metrics as telemetry;

/// Resultado de `fire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// Alerta nueva. `state` es FAILED si no hubo destinatarios elegibles.
    Created { alert_id: Uuid, state: AlertState, channels: Vec<ChannelId> },
    /// Plegada en una alerta existente dentro de la ventana de supresión.
    Suppressed { alert_id: Uuid },
}

impl FireOutcome {
    pub fn alert_id(&self) -> Uuid {
        match self {
            FireOutcome::Created { alert_id, .. } | FireOutcome::Suppressed { alert_id } => *alert_id,
        }
    }
}

/// Resumen de una pasada de `process_ready`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub sent: usize,
    pub rescheduled: usize,
    pub rate_limited: usize,
    pub closed: usize,
}

/// Entrada reclamada con su parte de la cuota ya reservada.
struct Planned {
    entry: QueueEntry,
    alert: Option<AlertEvent>,
    grant: usize,
}

enum EntryResult {
    Skipped,
    RateLimited,
    Sent { rescheduled: bool, closed: bool },
}

pub struct NotificationDispatcher {
    alerts: Arc<dyn AlertStore>,
    queue: Arc<dyn RetryQueue>,
    dedup: Arc<EventDeduplicator>,
    resolver: ScopeResolver,
    adapters: Arc<AdapterRegistry>,
    limiter: ChannelRateLimiter,
    settings: DispatcherConfig,
    channels: BTreeMap<ChannelId, ChannelConfig>,
}

impl NotificationDispatcher {
    pub fn new(
        config: &AppConfig,
        alerts: Arc<dyn AlertStore>,
        queue: Arc<dyn RetryQueue>,
        dedup: Arc<EventDeduplicator>,
        resolver: ScopeResolver,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        let channels: BTreeMap<ChannelId, ChannelConfig> =
            ChannelId::ALL.iter().map(|c| (*c, config.channel(*c))).collect();
        let limits: HashMap<ChannelId, u32> = channels.iter().map(|(c, cfg)| (*c, cfg.max_per_minute)).collect();
        Self {
            alerts,
            queue,
            dedup,
            resolver,
            adapters,
            limiter: ChannelRateLimiter::new(limits),
            settings: config.dispatcher.clone(),
            channels,
        }
    }

    pub fn alerts(&self) -> &Arc<dyn AlertStore> {
        &self.alerts
    }

    pub fn queue(&self) -> &Arc<dyn RetryQueue> {
        &self.queue
    }

    pub fn deduplicator(&self) -> &Arc<EventDeduplicator> {
        &self.dedup
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    fn channel_config(&self, channel: ChannelId) -> ChannelConfig {
        self.channels
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| ChannelConfig::default_for(channel))
    }

    pub async fn fire(&self, trigger: AlertTrigger) -> Result<FireOutcome, DispatchError> {
        self.fire_at(trigger, Utc::now()).await
    }

    /// Registra un disparo: suprime, resuelve destinatarios y encola entregas.
    #[instrument(skip(self, trigger), fields(rule = %trigger.rule_id, severity = %trigger.severity, scope = %trigger.scope_key))]
    pub async fn fire_at(&self, trigger: AlertTrigger, now: DateTime<Utc>) -> Result<FireOutcome, DispatchError> {
        let deadline = now
            + ChronoDuration::from_std(self.settings.deadline_for(trigger.severity))
                .unwrap_or_else(|_| ChronoDuration::minutes(15));
        let mut alert = AlertEvent::new(&trigger, deadline, now);

        // Dos vueltas como máximo: si la alerta dueña de la ventana ya fue
        // purgada se libera la entrada y se abre una nueva.
        for _ in 0..2 {
            let decision = self
                .dedup
                .check_and_mark(&alert.dedup_key, alert.id, now)
                .await
                .map_err(store_err)?;
            let existing = match decision {
                SuppressionDecision::Fresh => return self.open_alert(trigger, alert, now).await,
                SuppressionDecision::Suppressed { alert_id } => alert_id,
            };

            let folded = self
                .alerts
                .update(
                    existing,
                    Box::new(move |a: &mut AlertEvent| {
                        a.record_occurrence(now);
                        a.add_transformation("event_deduplicator", "suppressed", None, now);
                    }),
                )
                .await
                .map_err(store_err)?;
            if folded.is_some() {
                telemetry::record_alert_suppressed(trigger.severity);
                debug!(alert_id = %existing, "trigger folded into existing alert");
                return Ok(FireOutcome::Suppressed { alert_id: existing });
            }
            self.dedup.release(&alert.dedup_key, existing).await.map_err(store_err)?;
        }

        // Dos reclamos seguidos de la ventana fallaron: se abre igual.
        alert.add_transformation("event_deduplicator", "window_reclaimed", None, now);
        self.open_alert(trigger, alert, now).await
    }

    async fn open_alert(
        &self,
        trigger: AlertTrigger,
        mut alert: AlertEvent,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome, DispatchError> {
        let eligible = match self.resolver.eligible_recipients(&trigger.audience, &trigger.origin) {
            Ok(e) => e,
            Err(e) => {
                self.dedup.release(&alert.dedup_key, alert.id).await.map_err(store_err)?;
                return Err(DispatchError::Store(e.to_string()));
            }
        };

        let mut channels: Vec<ChannelId> = trigger.channels.clone();
        channels.sort_by_key(|c| (self.channel_config(*c).priority, *c));
        channels.dedup();

        let mut deliveries = Vec::new();
        for channel in &channels {
            let cfg = self.channel_config(*channel);
            if !cfg.enabled {
                alert.add_transformation(
                    "notification_dispatcher",
                    "channel_disabled",
                    Some(serde_json::json!({ "channel": channel })),
                    now,
                );
                continue;
            }
            let recipients = recipients_for(*channel, &eligible);
            if recipients.is_empty() {
                alert.add_transformation(
                    "notification_dispatcher",
                    "channel_no_recipients",
                    Some(serde_json::json!({ "channel": channel })),
                    now,
                );
                continue;
            }
            deliveries.push(DeliveryAttempt::new(alert.id, *channel, cfg.retry_policy(), recipients));
        }

        telemetry::record_alert_fired(alert.severity);
        let alert_id = alert.id;
        if deliveries.is_empty() {
            warn!(alert_id = %alert_id, "no eligible recipients for alert");
            alert.fail("no eligible recipients", now);
            self.insert(alert).await?;
            telemetry::record_alert_terminal(AlertState::Failed);
            return Ok(FireOutcome::Created { alert_id, state: AlertState::Failed, channels: Vec::new() });
        }

        let entries: Vec<QueueEntry> = deliveries
            .iter()
            .map(|d| QueueEntry {
                alert_id,
                channel: d.channel,
                severity: alert.severity,
                channel_priority: self.channel_config(d.channel).priority,
                next_attempt_at: now,
                enqueued_at: now,
            })
            .collect();
        let queued: Vec<ChannelId> = entries.iter().map(|e| e.channel).collect();
        alert.begin_dispatch(deliveries, now);
        let severity = alert.severity;
        self.insert(alert).await?;
        for entry in entries {
            self.queue.enqueue(entry).await.map_err(store_err)?;
        }
        info!(alert_id = %alert_id, severity = %severity, channels = ?queued, "alert dispatching");
        Ok(FireOutcome::Created { alert_id, state: AlertState::Dispatching, channels: queued })
    }

    async fn insert(&self, alert: AlertEvent) -> Result<(), DispatchError> {
        let (key, id) = (alert.dedup_key.clone(), alert.id);
        if let Err(e) = self.alerts.insert(alert).await {
            self.dedup.release(&key, id).await.map_err(store_err)?;
            return Err(store_err(e));
        }
        Ok(())
    }

    pub async fn process_ready(&self) -> Result<DispatchReport, DispatchError> {
        self.process_ready_at(Utc::now()).await
    }

    /// Reclama entregas listas y las procesa con concurrencia acotada.
    #[instrument(skip(self))]
    pub async fn process_ready_at(&self, now: DateTime<Utc>) -> Result<DispatchReport, DispatchError> {
        let claimed = self
            .queue
            .claim_ready(now, self.settings.claim_batch.max(1))
            .await
            .map_err(store_err)?;
        let mut report = DispatchReport { claimed: claimed.len(), ..Default::default() };
        if claimed.is_empty() {
            return Ok(report);
        }

        // La cuota se reserva en serie y en orden de servicio, antes de enviar
        // nada; los envíos sí corren en paralelo.
        let mut planned = Vec::with_capacity(claimed.len());
        for entry in claimed {
            planned.push(self.reserve(entry, now).await);
        }

        let results: Vec<Result<EntryResult, DispatchError>> = stream::iter(planned)
            .map(|plan| async move {
                match plan {
                    Ok(plan) => self.process_entry(plan, now).await,
                    Err(e) => Err(e),
                }
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                Ok(EntryResult::Skipped) => {}
                Ok(EntryResult::RateLimited) => report.rate_limited += 1,
                Ok(EntryResult::Sent { rescheduled, closed }) => {
                    report.sent += 1;
                    report.rescheduled += usize::from(rescheduled);
                    report.closed += usize::from(closed);
                }
                Err(e) => warn!(error = %e, "delivery processing failed"),
            }
        }

        if let Ok(stats) = self.queue.stats(now).await {
            telemetry::record_retry_queue_depth(stats.queued + stats.in_flight);
        }
        Ok(report)
    }

    async fn reserve(&self, entry: QueueEntry, now: DateTime<Utc>) -> Result<Planned, DispatchError> {
        let alert = self.alerts.get(entry.alert_id).await.map_err(store_err)?;
        let wanted = match alert.as_ref().and_then(|a| sendable(a, entry.channel)) {
            Some(d) if self.adapters.get(entry.channel).await.is_some() => d.due_recipients(now).len(),
            _ => 0,
        };
        let grant = if wanted == 0 {
            0
        } else {
            self.limiter.acquire_up_to(entry.channel, wanted as u32, now).await as usize
        };
        Ok(Planned { entry, alert, grant })
    }

    async fn process_entry(&self, plan: Planned, now: DateTime<Utc>) -> Result<EntryResult, DispatchError> {
        let Planned { entry, alert, grant } = plan;
        let key = entry.key();
        let Some(alert) = alert else {
            self.queue.complete(key).await.map_err(store_err)?;
            return Ok(EntryResult::Skipped);
        };
        let Some(delivery) = sendable(&alert, entry.channel) else {
            self.queue.complete(key).await.map_err(store_err)?;
            return Ok(EntryResult::Skipped);
        };
        let due = delivery.due_recipients(now);
        if due.is_empty() {
            // Sólo quedan reintentos cuyo backoff aún no vence.
            match delivery.next_retry_at {
                Some(at) => self.queue.reschedule(key, at).await.map_err(store_err)?,
                None => self.queue.complete(key).await.map_err(store_err)?,
            }
            return Ok(EntryResult::Skipped);
        }

        let Some(adapter) = self.adapters.get(entry.channel).await else {
            warn!(alert_id = %alert.id, channel = %entry.channel, "no adapter registered for channel");
            let channel = entry.channel;
            let closed = self
                .mutate_and_settle(alert.id, now, move |a| {
                    if let Some(d) = a.deliveries.get_mut(&channel) {
                        d.fail_permanently(format!("no adapter registered for channel {channel}"));
                    }
                })
                .await?;
            self.queue.complete(key).await.map_err(store_err)?;
            return Ok(EntryResult::Sent { rescheduled: false, closed });
        };

        if grant == 0 {
            let reopen = self.limiter.next_window(entry.channel, now).await;
            debug!(alert_id = %alert.id, channel = %entry.channel, until = %reopen, "channel quota exhausted");
            self.queue.reschedule(key, reopen).await.map_err(store_err)?;
            return Ok(EntryResult::RateLimited);
        }
        if grant < due.len() {
            debug!(
                alert_id = %alert.id,
                channel = %entry.channel,
                granted = grant,
                deferred = due.len() - grant,
                "channel quota partially granted"
            );
        }
        let recipients: Vec<RecipientRef> = due.into_iter().take(grant).collect();

        let started = Instant::now();
        let confirms = adapter.confirms_delivery();
        let mut outcomes = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let sent_at = Instant::now();
            let outcome = adapter.send(&alert, entry.channel, &recipient).await;
            telemetry::record_delivery_attempt(entry.channel, outcome.label(), sent_at.elapsed());
            outcomes.push((recipient, outcome.into_recipient_outcome(confirms)));
        }
        let elapsed = started.elapsed();
        let target = self.channel_config(entry.channel).latency_target();
        if elapsed > target {
            warn!(
                alert_id = %alert.id,
                channel = %entry.channel,
                elapsed_ms = elapsed.as_millis() as u64,
                target_ms = target.as_millis() as u64,
                "channel delivery over latency target"
            );
        }

        let channel = entry.channel;
        let confirmation_timeout = self.settings.confirmation_timeout();
        let (tx, rx) = oneshot::channel();
        let updated = self
            .alerts
            .update(
                alert.id,
                Box::new(move |a: &mut AlertEvent| {
                    if let Some(d) = a.deliveries.get_mut(&channel) {
                        d.record_attempt(outcomes, Some(elapsed), confirmation_timeout, now);
                    }
                    let _ = tx.send(a.settle(now));
                }),
            )
            .await
            .map_err(store_err)?;
        let transition = rx.await.ok().flatten();

        let Some(updated) = updated else {
            self.queue.complete(key).await.map_err(store_err)?;
            return Ok(EntryResult::Skipped);
        };
        let retry_at = match updated.deliveries.get(&channel).filter(|d| d.state == DeliveryState::Retrying) {
            Some(d) => {
                // Los que no cupieron vuelven cuando se reabre la ventana.
                let quota_at = if d.has_unsent() {
                    Some(self.limiter.next_window(channel, now).await)
                } else {
                    None
                };
                match (d.next_retry_at, quota_at) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            }
            None => None,
        };

        let rescheduled = match (transition, retry_at) {
            (None, Some(at)) => {
                self.queue.reschedule(key, at).await.map_err(store_err)?;
                true
            }
            _ => {
                self.queue.complete(key).await.map_err(store_err)?;
                false
            }
        };
        if let Some(state) = transition {
            self.on_terminal(updated.id, state).await?;
        }
        Ok(EntryResult::Sent { rescheduled, closed: transition.is_some() })
    }

    /// Aplica `mutation` y `settle` en una sola actualización. Devuelve si la alerta cerró.
    async fn mutate_and_settle<F>(&self, alert_id: Uuid, now: DateTime<Utc>, mutation: F) -> Result<bool, DispatchError>
    where
        F: FnOnce(&mut AlertEvent) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let updated = self
            .alerts
            .update(
                alert_id,
                Box::new(move |a: &mut AlertEvent| {
                    mutation(a);
                    let _ = tx.send(a.settle(now));
                }),
            )
            .await
            .map_err(store_err)?;
        if updated.is_none() {
            return Err(DispatchError::AlertNotFound(alert_id));
        }
        match rx.await.ok().flatten() {
            Some(state) => {
                self.on_terminal(alert_id, state).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn on_terminal(&self, alert_id: Uuid, state: AlertState) -> Result<(), DispatchError> {
        telemetry::record_alert_terminal(state);
        self.queue.remove_alert(alert_id).await.map_err(store_err)?;
        info!(alert_id = %alert_id, state = %state, "alert closed");
        Ok(())
    }

    pub async fn sweep(&self) -> Result<usize, DispatchError> {
        self.sweep_at(Utc::now()).await
    }

    /// Cierra alertas en curso cuyo plazo venció o cuyas entregas se dan por hechas.
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, DispatchError> {
        let ids = self
            .alerts
            .query_ids(&AlertQuery { states: Some(vec![AlertState::Dispatching]), ..Default::default() })
            .await
            .map_err(store_err)?;
        let mut closed = 0;
        for id in ids {
            match self.mutate_and_settle(id, now, |_| {}).await {
                Ok(true) => closed += 1,
                Ok(false) | Err(DispatchError::AlertNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if closed > 0 {
            debug!(closed, "sweep closed alerts");
        }
        Ok(closed)
    }

    /// Confirmación explícita de entrega informada por un adaptador o cliente.
    #[instrument(skip(self))]
    pub async fn confirm_delivery(
        &self,
        alert_id: Uuid,
        channel: ChannelId,
        principal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertEvent, DispatchError> {
        let alert = self
            .alerts
            .get(alert_id)
            .await
            .map_err(store_err)?
            .ok_or(DispatchError::AlertNotFound(alert_id))?;
        let known = alert
            .deliveries
            .get(&channel)
            .is_some_and(|d| d.recipients.iter().any(|r| r.recipient.principal_id == principal_id));
        if !known {
            return Err(DispatchError::UnknownDelivery { alert_id, channel });
        }

        let principal = principal_id.to_string();
        self.mutate_and_settle(alert_id, now, move |a| {
            if let Some(d) = a.deliveries.get_mut(&channel) {
                if d.confirm(&principal) {
                    a.add_transformation(
                        "notification_dispatcher",
                        "delivery_confirmed",
                        Some(serde_json::json!({ "channel": channel, "principal": principal })),
                        now,
                    );
                }
            }
        })
        .await?;

        self.alerts
            .get(alert_id)
            .await
            .map_err(store_err)?
            .ok_or(DispatchError::AlertNotFound(alert_id))
    }

    pub async fn get_alert(&self, alert_id: Uuid) -> Result<AlertEvent, DispatchError> {
        self.alerts
            .get(alert_id)
            .await
            .map_err(store_err)?
            .ok_or(DispatchError::AlertNotFound(alert_id))
    }
}

/// Direcciones del canal para los destinatarios elegibles. En la bandeja de la
/// aplicación el propio id del principal es la dirección.
fn recipients_for(channel: ChannelId, eligible: &[EligibleRecipient]) -> Vec<RecipientRef> {
    let mut out: Vec<RecipientRef> = eligible
        .iter()
        .filter_map(|e| {
            let address = match e.principal.contact(channel) {
                Some(addr) => addr.to_string(),
                None if channel == ChannelId::InApp => e.principal.id.clone(),
                None => return None,
            };
            Some(RecipientRef { principal_id: e.principal.id.clone(), address })
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Entrega del canal que aún admite envíos.
fn sendable(alert: &AlertEvent, channel: ChannelId) -> Option<&DeliveryAttempt> {
    alert.deliveries.get(&channel).filter(|d| {
        alert.state == AlertState::Dispatching && !d.state.is_final() && d.state != DeliveryState::Accepted
    })
}

fn store_err(e: anyhow::Error) -> DispatchError {
    DispatchError::Store(format!("{e:#}"))
}
