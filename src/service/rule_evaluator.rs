// src/service/rule_evaluator.rs
//! Evaluación de reglas de alerta.
//!
//! Cada regla activa se evalúa sobre todos los datos (alcance de sistema) y
//! produce un `AlertTrigger` por grupo que la cumple. Los destinatarios se
//! eligen después, en el despachador, re-aplicando el resolvedor de alcance a
//! los datos de origen del disparo.
//!
//! - `threshold`: valor agregado de la ventana por grupo.
//! - `anomaly`: serie diaria por grupo; dispara el periodo de la ventana con
//!   mayor puntuación si alcanza `min_score`.
//! - `forecast_deviation`: pronostica el último día a partir de la historia
//!   previa y dispara si el valor real cae fuera del intervalo.

use chrono::{Duration as ChronoDuration, NaiveDate};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::error::{EngineError, ForecastError};
use crate::domain::model::access_level::AccessLevel;
use crate::domain::model::alert::{AlertTrigger, TriggerSource};
use crate::domain::model::currency::ExchangeRateSnapshot;
use crate::domain::model::forecast::{decimal_to_f64, ModelHint, TimeSeries};
use crate::domain::model::metric::{DateRange, GroupKey, MetricResult};
use crate::domain::model::scope_filter::{ColumnMask, OrgFacts, RowScope, ScopeFilter};
use crate::repository::rule_store::{RuleCondition, RuleDefinition, RuleStore, RuleVersion};
use crate::service::forecast_engine::ForecastEngine;
use crate::service::metrics_aggregator::MetricsAggregator;

/// Regla que no pudo evaluarse (o un grupo sin datos suficientes).
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSkip {
    pub rule_id: String,
    pub scope_key: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuleEvaluation {
    pub as_of: Option<NaiveDate>,
    pub rules_evaluated: usize,
    pub triggers: Vec<AlertTrigger>,
    pub skipped: Vec<RuleSkip>,
}

pub struct RuleEvaluator {
    rules: Arc<dyn RuleStore>,
    aggregator: Arc<MetricsAggregator>,
    engine: Arc<ForecastEngine>,
}

/// Alcance sin restricción usado para evaluar reglas.
pub fn system_scope() -> ScopeFilter {
    ScopeFilter {
        principal_id: "system:rule-evaluator".into(),
        level: AccessLevel::Admin,
        rows: RowScope::All,
        columns: ColumnMask::Full,
        read_only: false,
    }
}

fn window_ending(as_of: NaiveDate, days: u32) -> Result<DateRange, EngineError> {
    let start = as_of - ChronoDuration::days(i64::from(days.max(1)) - 1);
    Ok(DateRange::new(start, as_of)?)
}

impl RuleEvaluator {
    pub fn new(rules: Arc<dyn RuleStore>, aggregator: Arc<MetricsAggregator>, engine: Arc<ForecastEngine>) -> Self {
        Self { rules, aggregator, engine }
    }

    /// Evalúa todas las reglas activas con fecha de corte `as_of`.
    ///
    /// Un fallo en una regla no detiene las demás: queda en `skipped`.
    #[instrument(skip(self, rates))]
    pub async fn evaluate(
        &self,
        as_of: NaiveDate,
        rates: Option<&ExchangeRateSnapshot>,
    ) -> Result<RuleEvaluation, EngineError> {
        let active = self.rules.get_active_rules().await?;
        let mut out = RuleEvaluation { as_of: Some(as_of), ..Default::default() };

        for rule in &active {
            out.rules_evaluated += 1;
            match self.evaluate_rule(rule, as_of, rates, &mut out.skipped).await {
                Ok(triggers) => out.triggers.extend(triggers),
                Err(e) => {
                    warn!(rule = %rule.rule_id, version = rule.version, error = %e, "rule evaluation failed");
                    out.skipped.push(RuleSkip { rule_id: rule.rule_id.clone(), scope_key: None, reason: e.to_string() });
                }
            }
        }

        info!(
            rules = out.rules_evaluated,
            triggers = out.triggers.len(),
            skipped = out.skipped.len(),
            "alert rules evaluated"
        );
        Ok(out)
    }

    #[instrument(skip(self, rule, rates, skipped), fields(rule = %rule.rule_id, version = rule.version))]
    pub async fn evaluate_rule(
        &self,
        rule: &RuleVersion,
        as_of: NaiveDate,
        rates: Option<&ExchangeRateSnapshot>,
        skipped: &mut Vec<RuleSkip>,
    ) -> Result<Vec<AlertTrigger>, EngineError> {
        let def = &rule.definition;
        match &def.condition {
            RuleCondition::Threshold { op, value } => {
                let range = window_ending(as_of, def.window_days)?;
                let result = self.aggregator.compute(def.metric, range, def.group_by, &system_scope(), rates).await?;
                let mut triggers = Vec::new();
                for row in result.rows.iter().filter(|r| op.apply(r.value, *value)) {
                    let observed = decimal_to_f64(row.value);
                    let message = format!(
                        "{}: {} = {} {} {} ({}, {})",
                        def.name, def.metric, row.value, op.symbol(), value, row.key, range
                    );
                    triggers.push(trigger_for(
                        rule,
                        TriggerSource::Threshold,
                        range.to_string(),
                        row.key.to_string(),
                        message,
                        Some(observed),
                        row.origin.clone(),
                    ));
                }
                Ok(triggers)
            }
            RuleCondition::Anomaly { model, min_score, history_days } => {
                let range = window_ending(as_of, *history_days)?;
                let window_start = as_of - ChronoDuration::days(i64::from(def.window_days.max(1)) - 1);
                let hint = model.unwrap_or(ModelHint::Auto);
                let partitions = self
                    .aggregator
                    .compute_partitioned(def.metric, range, def.group_by, &system_scope(), rates)
                    .await?;

                let mut triggers = Vec::new();
                for (key, result) in partitions {
                    let series = TimeSeries::from_metric_result(&result)?;
                    let engine = self.engine.clone();
                    let flags = tokio::task::spawn_blocking(move || engine.detect_anomalies(&series, hint))
                        .await
                        .map_err(|e| EngineError::Internal(e.to_string()))??;

                    let worst = flags
                        .iter()
                        .filter(|f| f.period_start >= window_start && f.score >= *min_score)
                        .max_by(|a, b| a.score.total_cmp(&b.score));
                    let Some(flag) = worst else {
                        continue;
                    };
                    let expected = flag.expected.map(|e| format!(" (expected {e:.2})")).unwrap_or_default();
                    let message = format!(
                        "{}: anomalous {} on {} for {}: {:.2}{}, score {:.2} ({})",
                        def.name, def.metric, flag.period_start, key, flag.value, expected, flag.score, flag.model_id
                    );
                    triggers.push(trigger_for(
                        rule,
                        TriggerSource::Anomaly,
                        flag.period_start.to_string(),
                        key.to_string(),
                        message,
                        Some(flag.value),
                        origin_for_day(&result, flag.period_start),
                    ));
                }
                Ok(triggers)
            }
            RuleCondition::ForecastDeviation { model, history_days } => {
                let range = window_ending(as_of, *history_days)?;
                let hint = model.unwrap_or(ModelHint::Auto);
                let partitions = self
                    .aggregator
                    .compute_partitioned(def.metric, range, def.group_by, &system_scope(), rates)
                    .await?;

                let mut triggers = Vec::new();
                for (key, result) in partitions {
                    let mut series = TimeSeries::from_metric_result(&result)?;
                    let Some(actual) = series.points.pop() else {
                        continue;
                    };
                    let engine = self.engine.clone();
                    let forecast = tokio::task::spawn_blocking(move || engine.forecast(&series, 1, hint))
                        .await
                        .map_err(|e| EngineError::Internal(e.to_string()))?;
                    let forecast = match forecast {
                        Ok(f) => f,
                        // Sin historia suficiente o serie plana en este grupo: no se puede evaluar.
                        Err(e @ (ForecastError::InsufficientHistory { .. } | ForecastError::DegenerateSeries { .. })) => {
                            debug!(scope = %key, error = %e, "group skipped");
                            skipped.push(RuleSkip {
                                rule_id: rule.rule_id.clone(),
                                scope_key: Some(key.to_string()),
                                reason: e.to_string(),
                            });
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    let Some(point) = forecast.points.first() else {
                        continue;
                    };
                    if point.contains(actual.value) {
                        continue;
                    }
                    let message = format!(
                        "{}: {} on {} for {} was {:.2}, outside forecast [{:.2}, {:.2}] ({})",
                        def.name, def.metric, actual.period_start, key, actual.value, point.lower, point.upper, forecast.model_id
                    );
                    triggers.push(trigger_for(
                        rule,
                        TriggerSource::ForecastDeviation,
                        actual.period_start.to_string(),
                        key.to_string(),
                        message,
                        Some(actual.value),
                        origin_for_day(&result, actual.period_start),
                    ));
                }
                Ok(triggers)
            }
        }
    }
}

/// Datos de origen del día disparado; sin ventas ese día, los de toda la serie.
fn origin_for_day(result: &MetricResult, day: NaiveDate) -> BTreeSet<OrgFacts> {
    match result.row(&GroupKey::Day(day)) {
        Some(row) if !row.origin.is_empty() => row.origin.clone(),
        _ => result.origin(),
    }
}

fn trigger_for(
    rule: &RuleVersion,
    source: TriggerSource,
    period: String,
    scope_key: String,
    message: String,
    observed: Option<f64>,
    origin: BTreeSet<OrgFacts>,
) -> AlertTrigger {
    let def: &RuleDefinition = &rule.definition;
    AlertTrigger {
        rule_id: rule.rule_id.clone(),
        rule_version: rule.version,
        severity: def.severity,
        source,
        channels: def.channels.clone(),
        audience: def.audience.clone(),
        metric: def.metric.to_string(),
        period,
        scope_key,
        message,
        observed,
        origin,
    }
}
