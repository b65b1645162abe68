// src/repository/rule_store.rs
//! Reglas de alerta versionadas y validadas.
//!
//! - Acepta reglas en JSON o YAML (misma representación interna).
//! - Tres tipos de condición: umbral sobre una métrica, anomalía y desviación
//!   respecto al pronóstico.
//! - Versionado con rollback por `rule_id`; sólo una versión activa.
//! - Hook de auditoría para cambios de reglas.
//!
//! Ejemplo (YAML):
//! ```yaml
//! id: ventas-sucursal-bajas
//! name: Ventas netas diarias bajas por sucursal
//! metric: ventas_netas
//! group_by: branch
//! window_days: 1
//! condition: { kind: threshold, op: lt, value: "500.00" }
//! severity: high
//! channels: [email, slack]
//! audience: [DIRECTOR_SUCURSAL, GERENTE_REGIONAL]
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::domain::model::access_level::AccessLevel;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::forecast::ModelHint;
use crate::domain::model::metric::{GroupBy, MetricName};
use crate::domain::model::severity::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Json,
    Yaml,
}

impl RuleFormat {
    /// Deduce el formato a partir de un content-type HTTP.
    pub fn from_content_type(ct: &str) -> Self {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("yaml") || ct.contains("yml") {
            RuleFormat::Yaml
        } else {
            RuleFormat::Json
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Neq,
}

impl Op {
    pub fn apply(self, observed: Decimal, value: Decimal) -> bool {
        match self {
            Op::Gt => observed > value,
            Op::Gte => observed >= value,
            Op::Lt => observed < value,
            Op::Lte => observed <= value,
            Op::Eq => observed == value,
            Op::Neq => observed != value,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Eq => "==",
            Op::Neq => "!=",
        }
    }
}

fn default_history_days() -> u32 {
    28
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Valor agregado de la métrica en la ventana `op value`.
    Threshold { op: Op, value: Decimal },
    /// Algún periodo de la ventana con puntuación de anomalía >= `min_score`.
    Anomaly {
        #[serde(default)]
        model: Option<ModelHint>,
        min_score: f64,
        #[serde(default = "default_history_days")]
        history_days: u32,
    },
    /// El valor real del último periodo queda fuera del intervalo pronosticado
    /// a partir de la historia previa.
    ForecastDeviation {
        #[serde(default)]
        model: Option<ModelHint>,
        #[serde(default = "default_history_days")]
        history_days: u32,
    },
}

fn default_window_days() -> u32 {
    1
}

fn default_group_by() -> GroupBy {
    GroupBy::Total
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i64, // mayor = se evalúa antes
    pub metric: MetricName,
    #[serde(default = "default_group_by")]
    pub group_by: GroupBy,
    /// Días evaluados hasta la fecha de corte (inclusive).
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    pub condition: RuleCondition,
    pub severity: Severity,
    pub channels: Vec<ChannelId>,
    /// Niveles que reciben la alerta; vacío = todos los que ven los datos.
    #[serde(default)]
    pub audience: Vec<AccessLevel>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleVersion {
    pub uid: Uuid,
    pub rule_id: String,
    pub version: u32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub definition: RuleDefinition,
    pub active: bool,
}

#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn record_rule_change(&self, entry: &RuleVersion, action: &str);
}

/// Deja constancia de los cambios en el log estructurado.
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn record_rule_change(&self, entry: &RuleVersion, action: &str) {
        info!(
            rule_id = %entry.rule_id,
            version = entry.version,
            actor = %entry.created_by,
            action,
            "alert rule changed"
        );
    }
}

#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    async fn create_rule(&self, created_by: &str, raw: &str, format: RuleFormat) -> anyhow::Result<RuleVersion>;
    async fn update_rule(&self, rule_id: &str, created_by: &str, raw: &str, format: RuleFormat) -> anyhow::Result<RuleVersion>;
    /// Versiones activas ordenadas por prioridad descendente e id.
    async fn get_active_rules(&self) -> anyhow::Result<Vec<RuleVersion>>;
    async fn get_rule_versions(&self, rule_id: &str) -> anyhow::Result<Vec<RuleVersion>>;
    async fn rollback_rule(&self, rule_id: &str, target_version: u32, performed_by: &str) -> anyhow::Result<RuleVersion>;
    async fn deactivate_rule(&self, rule_id: &str, performed_by: &str) -> anyhow::Result<()>;
    /// Valida sintaxis y semántica sin almacenar.
    async fn validate_raw_rule(&self, raw: &str, format: RuleFormat) -> anyhow::Result<RuleDefinition>;
}

pub fn parse_raw_rule(raw: &str, format: RuleFormat) -> anyhow::Result<RuleDefinition> {
    let def: RuleDefinition = match format {
        RuleFormat::Json => serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("JSON parse error: {}", e))?,
        RuleFormat::Yaml => serde_yaml::from_str(raw).map_err(|e| anyhow::anyhow!("YAML parse error: {}", e))?,
    };
    validate_definition(&def)?;
    Ok(def)
}

pub fn validate_definition(def: &RuleDefinition) -> anyhow::Result<()> {
    if def.id.trim().is_empty() {
        anyhow::bail!("rule id must not be empty");
    }
    if def.name.trim().is_empty() {
        anyhow::bail!("rule name must not be empty");
    }
    if def.channels.is_empty() {
        anyhow::bail!("rule '{}' must target at least one channel", def.id);
    }
    let unique: BTreeSet<_> = def.channels.iter().collect();
    if unique.len() != def.channels.len() {
        anyhow::bail!("rule '{}' lists a channel twice", def.id);
    }
    if def.window_days == 0 {
        anyhow::bail!("rule '{}' window_days must be at least 1", def.id);
    }
    match &def.condition {
        RuleCondition::Threshold { .. } => {}
        RuleCondition::Anomaly { min_score, history_days, .. } => {
            if !(0.0..=1.0).contains(min_score) {
                anyhow::bail!("rule '{}' min_score must be within [0, 1]", def.id);
            }
            if *history_days < def.window_days {
                anyhow::bail!("rule '{}' history_days must cover the window", def.id);
            }
        }
        RuleCondition::ForecastDeviation { history_days, .. } => {
            if *history_days == 0 {
                anyhow::bail!("rule '{}' history_days must be positive", def.id);
            }
        }
    }
    if !matches!(def.condition, RuleCondition::Threshold { .. })
        && matches!(def.group_by, GroupBy::Day | GroupBy::Month)
    {
        anyhow::bail!("rule '{}': time-series conditions cannot group by a time dimension", def.id);
    }
    Ok(())
}

#[derive(Default)]
struct Inner {
    // rule_id -> versiones en orden ascendente
    versions: HashMap<String, Vec<RuleVersion>>,
}

pub struct InMemoryRuleStore {
    inner: Arc<RwLock<Inner>>,
    audit: Arc<dyn AuditSink>,
}

impl InMemoryRuleStore {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())), audit }
    }

    fn push_version(versions: &mut Vec<RuleVersion>, rule_id: &str, created_by: &str, definition: RuleDefinition, active: bool) -> RuleVersion {
        let next_version = versions.last().map(|v| v.version).unwrap_or(0) + 1;
        for v in versions.iter_mut() {
            v.active = false;
        }
        let rv = RuleVersion {
            uid: Uuid::new_v4(),
            rule_id: rule_id.to_string(),
            version: next_version,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            definition,
            active,
        };
        versions.push(rv.clone());
        rv
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn create_rule(&self, created_by: &str, raw: &str, format: RuleFormat) -> anyhow::Result<RuleVersion> {
        let def = parse_raw_rule(raw, format)?;
        let rv = {
            let mut inner = self.inner.write().await;
            let versions = inner.versions.entry(def.id.clone()).or_default();
            if versions.iter().any(|v| v.active) {
                anyhow::bail!("rule '{}' already exists; update it instead", def.id);
            }
            let id = def.id.clone();
            Self::push_version(versions, &id, created_by, def, true)
        };
        self.audit.record_rule_change(&rv, "create").await;
        Ok(rv)
    }

    async fn update_rule(&self, rule_id: &str, created_by: &str, raw: &str, format: RuleFormat) -> anyhow::Result<RuleVersion> {
        let def = parse_raw_rule(raw, format)?;
        if def.id != rule_id {
            anyhow::bail!("rule id in payload '{}' does not match targeted '{}'", def.id, rule_id);
        }
        let rv = {
            let mut inner = self.inner.write().await;
            let versions = inner
                .versions
                .get_mut(rule_id)
                .ok_or_else(|| anyhow::anyhow!("rule '{}' not found", rule_id))?;
            Self::push_version(versions, rule_id, created_by, def, true)
        };
        self.audit.record_rule_change(&rv, "update").await;
        Ok(rv)
    }

    async fn get_active_rules(&self) -> anyhow::Result<Vec<RuleVersion>> {
        let inner = self.inner.read().await;
        let mut out: Vec<RuleVersion> = inner
            .versions
            .values()
            .filter_map(|vs| vs.iter().find(|v| v.active))
            .filter(|v| v.definition.enabled)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.definition
                .priority
                .cmp(&a.definition.priority)
                .then(a.rule_id.cmp(&b.rule_id))
        });
        Ok(out)
    }

    async fn get_rule_versions(&self, rule_id: &str) -> anyhow::Result<Vec<RuleVersion>> {
        let inner = self.inner.read().await;
        Ok(inner.versions.get(rule_id).cloned().unwrap_or_default())
    }

    async fn rollback_rule(&self, rule_id: &str, target_version: u32, performed_by: &str) -> anyhow::Result<RuleVersion> {
        let rv = {
            let mut inner = self.inner.write().await;
            let versions = inner
                .versions
                .get_mut(rule_id)
                .ok_or_else(|| anyhow::anyhow!("rule '{}' not found", rule_id))?;
            let definition = versions
                .iter()
                .find(|v| v.version == target_version)
                .map(|v| v.definition.clone())
                .ok_or_else(|| anyhow::anyhow!("rule '{}' has no version {}", rule_id, target_version))?;
            Self::push_version(versions, rule_id, performed_by, definition, true)
        };
        self.audit.record_rule_change(&rv, "rollback").await;
        Ok(rv)
    }

    async fn deactivate_rule(&self, rule_id: &str, performed_by: &str) -> anyhow::Result<()> {
        let rv = {
            let mut inner = self.inner.write().await;
            let versions = inner
                .versions
                .get_mut(rule_id)
                .ok_or_else(|| anyhow::anyhow!("rule '{}' not found", rule_id))?;
            let definition = versions
                .last()
                .map(|v| v.definition.clone())
                .ok_or_else(|| anyhow::anyhow!("rule '{}' has no versions", rule_id))?;
            Self::push_version(versions, rule_id, performed_by, definition, false)
        };
        self.audit.record_rule_change(&rv, "deactivate").await;
        Ok(())
    }

    async fn validate_raw_rule(&self, raw: &str, format: RuleFormat) -> anyhow::Result<RuleDefinition> {
        parse_raw_rule(raw, format)
    }
}
