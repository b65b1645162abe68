// src/domain/model/alert.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::domain::model::access_level::AccessLevel;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::delivery_status::{DeliveryAttempt, DeliveryState};
use crate::domain::model::scope_filter::OrgFacts;
use crate::domain::model::severity::Severity;

/// Máquina de estados de una alerta:
/// `PENDING -> DISPATCHING -> {DELIVERED, PARTIALLY_DELIVERED, FAILED, EXPIRED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    Pending,
    Dispatching,
    Delivered,
    PartiallyDelivered,
    Failed,
    Expired,
}

impl AlertState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AlertState::Pending | AlertState::Dispatching)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertState::Pending => "pending",
            AlertState::Dispatching => "dispatching",
            AlertState::Delivered => "delivered",
            AlertState::PartiallyDelivered => "partially_delivered",
            AlertState::Failed => "failed",
            AlertState::Expired => "expired",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qué tipo de evaluación disparó la regla.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Threshold,
    Anomaly,
    ForecastDeviation,
}

/// Disparo de una regla, antes de deduplicar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTrigger {
    pub rule_id: String,
    pub rule_version: u32,
    pub severity: Severity,
    pub source: TriggerSource,
    pub channels: Vec<ChannelId>,
    /// Niveles de acceso destinatarios; vacío = cualquier nivel.
    #[serde(default)]
    pub audience: Vec<AccessLevel>,
    pub metric: String,
    /// Periodo evaluado (rango o periodo puntual).
    pub period: String,
    /// Alcance de los datos disparadores (clave de grupo, p.ej. "branch:7").
    pub scope_key: String,
    pub message: String,
    #[serde(default)]
    pub observed: Option<f64>,
    /// Datos organizacionales de los registros que originaron el disparo.
    #[serde(default)]
    pub origin: BTreeSet<OrgFacts>,
}

impl AlertTrigger {
    /// Clave de supresión: (regla, alcance, métrica, periodo).
    pub fn dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.rule_id, &self.scope_key, &self.metric, &self.period] {
            hasher.update(part.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(b"alert-dedup-v1");
        hex::encode(hasher.finalize())
    }
}

/// Registro de una decisión tomada sobre la alerta (auditoría).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRecord {
    pub actor: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub details: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub dedup_key: String,
    pub rule_id: String,
    pub rule_version: u32,
    pub severity: Severity,
    pub source: TriggerSource,
    pub metric: String,
    pub period: String,
    pub scope_key: String,
    pub message: String,
    pub observed: Option<f64>,
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Disparos colapsados en esta alerta dentro de la ventana de supresión.
    pub occurrences: u32,
    pub last_seen_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub terminal_reason: Option<String>,
    pub deliveries: BTreeMap<ChannelId, DeliveryAttempt>,
    pub audit_trail: Vec<TransformationRecord>,
}

impl AlertEvent {
    pub fn new(trigger: &AlertTrigger, deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let mut alert = AlertEvent {
            id: Uuid::new_v4(),
            dedup_key: trigger.dedup_key(),
            rule_id: trigger.rule_id.clone(),
            rule_version: trigger.rule_version,
            severity: trigger.severity,
            source: trigger.source,
            metric: trigger.metric.clone(),
            period: trigger.period.clone(),
            scope_key: trigger.scope_key.clone(),
            message: trigger.message.clone(),
            observed: trigger.observed,
            state: AlertState::Pending,
            created_at: now,
            deadline,
            occurrences: 1,
            last_seen_at: now,
            closed_at: None,
            terminal_reason: None,
            deliveries: BTreeMap::new(),
            audit_trail: Vec::new(),
        };
        alert.add_transformation(
            "rule_evaluator",
            "fired",
            Some(serde_json::json!({ "source": trigger.source, "observed": trigger.observed })),
            now,
        );
        alert
    }

    pub fn add_transformation(
        &mut self,
        actor: impl Into<String>,
        action: impl Into<String>,
        details: Option<JsonValue>,
        at: DateTime<Utc>,
    ) {
        self.audit_trail.push(TransformationRecord {
            actor: actor.into(),
            action: action.into(),
            timestamp: at,
            details,
        });
    }

    /// PENDING -> DISPATCHING con un `DeliveryAttempt` por canal con destinatarios.
    pub fn begin_dispatch(&mut self, deliveries: Vec<DeliveryAttempt>, now: DateTime<Utc>) {
        if self.state != AlertState::Pending {
            return;
        }
        let channels: Vec<&str> = deliveries.iter().map(|d| d.channel.as_str()).collect();
        let details = serde_json::json!({ "channels": channels });
        self.deliveries = deliveries.into_iter().map(|d| (d.channel, d)).collect();
        self.state = AlertState::Dispatching;
        self.add_transformation("notification_dispatcher", "dispatching", Some(details), now);
    }

    pub fn record_occurrence(&mut self, now: DateTime<Utc>) {
        self.occurrences = self.occurrences.saturating_add(1);
        self.last_seen_at = now;
    }

    /// Termina la alerta sin entregas (p.ej. sin destinatarios elegibles).
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        if self.state.is_terminal() {
            return;
        }
        let reason = reason.into();
        self.state = AlertState::Failed;
        self.closed_at = Some(now);
        self.add_transformation("notification_dispatcher", "failed", Some(serde_json::json!({ "reason": reason })), now);
        self.terminal_reason = Some(reason);
    }

    /// Evalúa las reglas de cierre. Devuelve el nuevo estado terminal si hubo transición.
    ///
    /// - Todos los canales finales antes del plazo: DELIVERED si todos entregaron,
    ///   FAILED si ninguno, PARTIALLY_DELIVERED si hay mezcla.
    /// - Plazo vencido: los canales aún abiertos pasan a EXPIRED. Sin éxitos y con
    ///   alguno que seguía en curso, la alerta queda EXPIRED.
    pub fn settle(&mut self, now: DateTime<Utc>) -> Option<AlertState> {
        if self.state != AlertState::Dispatching {
            return None;
        }
        for d in self.deliveries.values_mut() {
            d.apply_assumed_deliveries(now);
        }

        let all_final = self.deliveries.values().all(|d| d.state.is_final());
        let past_deadline = now >= self.deadline;
        if !all_final && !past_deadline {
            return None;
        }

        let mut still_open = 0usize;
        if !all_final {
            for d in self.deliveries.values_mut().filter(|d| !d.state.is_final()) {
                d.expire();
                still_open += 1;
            }
        }

        let total = self.deliveries.len();
        let delivered = self
            .deliveries
            .values()
            .filter(|d| d.state == DeliveryState::Delivered)
            .count();

        let next = if total == 0 {
            AlertState::Failed
        } else if delivered == total {
            AlertState::Delivered
        } else if delivered > 0 {
            AlertState::PartiallyDelivered
        } else if still_open > 0 {
            AlertState::Expired
        } else {
            AlertState::Failed
        };

        let summary: BTreeMap<&str, &str> = self
            .deliveries
            .values()
            .map(|d| (d.channel.as_str(), d.state.as_str()))
            .collect();
        self.state = next;
        self.closed_at = Some(now);
        if next != AlertState::Delivered {
            self.terminal_reason = Some(format!("{delivered}/{total} channels delivered"));
        }
        self.add_transformation(
            "notification_dispatcher",
            next.as_str(),
            Some(serde_json::json!({ "channels": summary })),
            now,
        );
        Some(next)
    }
}
