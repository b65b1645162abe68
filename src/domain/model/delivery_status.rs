// src/domain/model/delivery_status.rs
//! Estado de entrega por (alerta, canal) y registro de intentos.
//!
//! Un `DeliveryAttempt` agrupa a todos los destinatarios elegibles de un canal.
//! Cada intento envía a los destinatarios pendientes que ya tocan, o a los que
//! quepan en el cupo del canal; los que no caben siguen pendientes sin gastar
//! intentos. Los errores transitorios se reintentan por destinatario según la
//! `RetryPolicy` del canal y los rechazos son definitivos. "Aceptado" por el adaptador no es "entregado": se espera la
//! confirmación del adaptador o, si éste no confirma, se asume entregado tras un
//! plazo.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::model::channel::ChannelId;

/// Estado del canal dentro de una alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Esperando primer intento.
    Pending,
    /// Quedan destinatarios pendientes: con reintento programado o a la espera de cupo.
    Retrying,
    /// Aceptado por el adaptador, pendiente de confirmación.
    Accepted,
    Delivered,
    /// Rechazado o con reintentos agotados.
    Failed,
    /// Seguía en curso al vencer el plazo de la alerta.
    Expired,
}

impl DeliveryState {
    pub fn is_final(self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::Failed | DeliveryState::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Retrying => "retrying",
            DeliveryState::Accepted => "accepted",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Failed => "failed",
            DeliveryState::Expired => "expired",
        }
    }
}

/// Política de reintentos de un canal: backoff exponencial con tope,
/// número máximo de intentos y espera total máxima.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    pub multiplier: f64,
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub max_total_wait: Duration,
}

impl RetryPolicy {
    /// Espera antes del intento `attempts_done + 1`:
    /// `min(initial * multiplier^(attempts_done - 1), max_backoff)`.
    pub fn backoff_for(&self, attempts_done: u32) -> Duration {
        let exp = attempts_done.saturating_sub(1) as i32;
        let base_ms = self.initial_backoff.as_millis() as f64;
        let raw = base_ms * self.multiplier.max(1.0).powi(exp);
        let capped = raw.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Devuelve la hora del próximo intento o `None` si la política está agotada.
    pub fn next_attempt_at(
        &self,
        attempts_done: u32,
        first_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if attempts_done >= self.max_attempts {
            return None;
        }
        let wait = ChronoDuration::from_std(self.backoff_for(attempts_done)).ok()?;
        let next = now + wait;
        let budget = ChronoDuration::from_std(self.max_total_wait).ok()?;
        if next - first_attempt_at > budget {
            return None;
        }
        Some(next)
    }
}

/// Serde de `Duration` como milisegundos enteros.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Destinatario concreto de un canal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipientRef {
    pub principal_id: String,
    /// Dirección en el canal (email, teléfono, URL, id de bandeja).
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientState {
    Pending,
    Accepted,
    Delivered,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientDelivery {
    pub recipient: RecipientRef,
    pub state: RecipientState,
    pub accepted_at: Option<DateTime<Utc>>,
    /// Para adaptadores sin confirmación: momento en que se asume entregado.
    pub assume_delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Envíos hechos a este destinatario.
    #[serde(default)]
    pub attempts: u32,
    /// Próximo reintento tras un error; `None` si aún no se le ha enviado.
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
}

impl RecipientDelivery {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == RecipientState::Pending && self.retry_at.map_or(true, |t| t <= now)
    }
}

/// Resultado de enviar a un destinatario dentro de un intento.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    Accepted { confirms: bool },
    Rejected(String),
    Error(String),
}

/// Registro de un intento individual (diagnóstico y auditoría).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub accepted: u32,
    pub rejected: u32,
    pub errored: u32,
    pub error: Option<String>,
}

/// Emparejamiento (alerta, canal) con contador de intentos, último error y próximo reintento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub channel: ChannelId,
    pub state: DeliveryState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub policy: RetryPolicy,
    pub recipients: Vec<RecipientDelivery>,
    pub history: Vec<AttemptRecord>,
}

impl DeliveryAttempt {
    pub fn new(alert_id: Uuid, channel: ChannelId, policy: RetryPolicy, recipients: Vec<RecipientRef>) -> Self {
        DeliveryAttempt {
            id: Uuid::new_v4(),
            alert_id,
            channel,
            state: DeliveryState::Pending,
            attempts: 0,
            last_error: None,
            next_retry_at: None,
            first_attempt_at: None,
            policy,
            recipients: recipients
                .into_iter()
                .map(|recipient| RecipientDelivery {
                    recipient,
                    state: RecipientState::Pending,
                    accepted_at: None,
                    assume_delivered_at: None,
                    last_error: None,
                    attempts: 0,
                    retry_at: None,
                })
                .collect(),
            history: Vec::new(),
        }
    }

    /// Destinatarios que el próximo intento debe cubrir.
    pub fn pending_recipients(&self) -> Vec<RecipientRef> {
        self.recipients
            .iter()
            .filter(|r| r.state == RecipientState::Pending)
            .map(|r| r.recipient.clone())
            .collect()
    }

    /// Pendientes cuyo reintento ya venció o que nunca se enviaron, en orden estable.
    pub fn due_recipients(&self, now: DateTime<Utc>) -> Vec<RecipientRef> {
        self.recipients
            .iter()
            .filter(|r| r.is_due(now))
            .map(|r| r.recipient.clone())
            .collect()
    }

    /// Hay pendientes que aún no recibieron ningún envío (esperan cupo).
    pub fn has_unsent(&self) -> bool {
        self.recipients
            .iter()
            .any(|r| r.state == RecipientState::Pending && r.attempts == 0)
    }

    /// Aplica el resultado de un intento y decide el siguiente estado.
    ///
    /// Sólo cuentan los destinatarios presentes en `outcomes`: un pendiente que
    /// no se envió (sin cupo) no consume intentos ni se da por fallido.
    pub fn record_attempt(
        &mut self,
        outcomes: Vec<(RecipientRef, RecipientOutcome)>,
        duration: Option<Duration>,
        confirmation_timeout: Duration,
        now: DateTime<Utc>,
    ) {
        if self.state.is_final() {
            return;
        }
        self.attempts = self.attempts.saturating_add(1);
        let first = *self.first_attempt_at.get_or_insert(now);

        let (mut accepted, mut rejected, mut errored) = (0u32, 0u32, 0u32);
        let mut last_error = None;
        let assume_after = ChronoDuration::from_std(confirmation_timeout).unwrap_or_else(|_| ChronoDuration::seconds(30));

        for (recipient, outcome) in outcomes {
            let Some(slot) = self.recipients.iter_mut().find(|r| r.recipient == recipient) else {
                continue;
            };
            if slot.state != RecipientState::Pending {
                continue;
            }
            slot.attempts = slot.attempts.saturating_add(1);
            slot.retry_at = None;
            match outcome {
                RecipientOutcome::Accepted { confirms } => {
                    accepted += 1;
                    slot.state = RecipientState::Accepted;
                    slot.accepted_at = Some(now);
                    slot.last_error = None;
                    if !confirms {
                        slot.assume_delivered_at = Some(now + assume_after);
                        if confirmation_timeout.is_zero() {
                            slot.state = RecipientState::Delivered;
                        }
                    }
                }
                RecipientOutcome::Rejected(msg) => {
                    rejected += 1;
                    let msg = redact_error(&msg);
                    slot.state = RecipientState::Rejected;
                    slot.last_error = Some(msg.clone());
                    last_error = Some(msg);
                }
                RecipientOutcome::Error(msg) => {
                    errored += 1;
                    let msg = redact_error(&msg);
                    slot.last_error = Some(msg.clone());
                    last_error = Some(msg);
                    match self.policy.next_attempt_at(slot.attempts, first, now) {
                        Some(at) => slot.retry_at = Some(at),
                        None => slot.state = RecipientState::Failed,
                    }
                }
            }
        }

        self.history.push(AttemptRecord {
            attempt_number: self.attempts,
            timestamp: now,
            duration_ms: duration.map(|d| d.as_millis() as u64),
            accepted,
            rejected,
            errored,
            error: last_error.clone(),
        });
        if last_error.is_some() {
            self.last_error = last_error;
        }

        // Los que esperan cupo no tienen hora propia: la pone el dispatcher.
        self.next_retry_at = self
            .recipients
            .iter()
            .filter(|r| r.state == RecipientState::Pending)
            .filter_map(|r| r.retry_at)
            .min();
        self.recompute_state();
    }

    /// Confirmación explícita del adaptador. Sólo un envío aceptado pasa a
    /// entregado; devuelve `true` si alguno cambió.
    pub fn confirm(&mut self, principal_id: &str) -> bool {
        if self.state.is_final() {
            return false;
        }
        let mut promoted = false;
        for r in self.recipients.iter_mut().filter(|r| r.recipient.principal_id == principal_id) {
            if r.state == RecipientState::Accepted {
                r.state = RecipientState::Delivered;
                promoted = true;
            }
        }
        if promoted {
            self.recompute_state();
        }
        promoted
    }

    /// Aplica la suposición de entrega por tiempo para adaptadores sin confirmación.
    pub fn apply_assumed_deliveries(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != DeliveryState::Accepted {
            return false;
        }
        let mut changed = false;
        for r in self.recipients.iter_mut() {
            if r.state == RecipientState::Accepted && r.assume_delivered_at.is_some_and(|t| t <= now) {
                r.state = RecipientState::Delivered;
                changed = true;
            }
        }
        if changed {
            self.recompute_state();
        }
        changed
    }

    /// Cierra el canal al vencer el plazo de la alerta.
    pub fn expire(&mut self) {
        if self.state.is_final() {
            return;
        }
        self.state = DeliveryState::Expired;
        self.next_retry_at = None;
        if self.last_error.is_none() {
            self.last_error = Some("alert deadline reached before delivery".into());
        }
    }

    /// Marca el canal como fallido sin más intentos (p.ej. sin adaptador registrado).
    pub fn fail_permanently(&mut self, reason: impl Into<String>) {
        if self.state.is_final() {
            return;
        }
        for r in self.recipients.iter_mut().filter(|r| {
            matches!(r.state, RecipientState::Pending | RecipientState::Accepted)
        }) {
            r.state = RecipientState::Failed;
        }
        self.last_error = Some(redact_error(&reason.into()));
        self.next_retry_at = None;
        self.state = DeliveryState::Failed;
    }

    fn recompute_state(&mut self) {
        let any = |s: RecipientState| self.recipients.iter().any(|r| r.state == s);
        self.state = if any(RecipientState::Pending) {
            DeliveryState::Retrying
        } else if any(RecipientState::Accepted) {
            DeliveryState::Accepted
        } else if any(RecipientState::Delivered) {
            DeliveryState::Delivered
        } else {
            DeliveryState::Failed
        };
    }
}

fn redact_error(err: &str) -> String {
    if err.chars().count() > 256 {
        let cut: String = err.chars().take(256).collect();
        format!("{cut}...[truncated]")
    } else {
        err.to_string()
    }
}
