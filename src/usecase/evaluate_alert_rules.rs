// src/usecase/evaluate_alert_rules.rs
//! Evalúa las reglas activas y entrega cada disparo al despachador.
//!
//! Un disparo que falla en el despachador no interrumpe los demás; queda
//! registrado en el resumen.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{EngineError, ScopeError};
use crate::domain::model::currency::ExchangeRateSnapshot;
use crate::service::notification_dispatcher::{FireOutcome, NotificationDispatcher};
use crate::service::rule_evaluator::RuleEvaluator;
use crate::service::scope_resolver::ScopeResolver;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationSummary {
    pub as_of: Option<NaiveDate>,
    pub rules_evaluated: usize,
    pub created: Vec<Uuid>,
    pub suppressed: Vec<Uuid>,
    /// `rule_id[/scope]: motivo` de reglas o grupos no evaluables.
    pub skipped: Vec<String>,
    pub dispatch_errors: Vec<String>,
}

pub struct EvaluateAlertRulesUseCase {
    evaluator: Arc<RuleEvaluator>,
    dispatcher: Arc<NotificationDispatcher>,
    resolver: ScopeResolver,
}

impl EvaluateAlertRulesUseCase {
    pub fn new(evaluator: Arc<RuleEvaluator>, dispatcher: Arc<NotificationDispatcher>, resolver: ScopeResolver) -> Self {
        Self { evaluator, dispatcher, resolver }
    }

    /// Evaluación pedida por un usuario: sólo alcances sin restricción de filas y con escritura.
    pub async fn execute_for(
        &self,
        principal_id: &str,
        as_of: NaiveDate,
        rates: Option<&ExchangeRateSnapshot>,
    ) -> Result<EvaluationSummary, EngineError> {
        let scope = self.resolver.resolve_id(principal_id)?;
        scope.ensure_writable()?;
        if !scope.rows.is_unrestricted() {
            return Err(ScopeError::Forbidden {
                principal: scope.principal_id,
                level: scope.level,
                action: "evaluate alert rules".into(),
            }
            .into());
        }
        self.execute(as_of, rates).await
    }

    pub async fn execute(
        &self,
        as_of: NaiveDate,
        rates: Option<&ExchangeRateSnapshot>,
    ) -> Result<EvaluationSummary, EngineError> {
        self.execute_at(as_of, rates, Utc::now()).await
    }

    #[instrument(skip(self, rates))]
    pub async fn execute_at(
        &self,
        as_of: NaiveDate,
        rates: Option<&ExchangeRateSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<EvaluationSummary, EngineError> {
        let evaluation = self.evaluator.evaluate(as_of, rates).await?;
        let mut summary = EvaluationSummary {
            as_of: evaluation.as_of,
            rules_evaluated: evaluation.rules_evaluated,
            skipped: evaluation
                .skipped
                .iter()
                .map(|s| match &s.scope_key {
                    Some(scope) => format!("{}/{}: {}", s.rule_id, scope, s.reason),
                    None => format!("{}: {}", s.rule_id, s.reason),
                })
                .collect(),
            ..Default::default()
        };

        for trigger in evaluation.triggers {
            let label = format!("{}/{}", trigger.rule_id, trigger.scope_key);
            match self.dispatcher.fire_at(trigger, now).await {
                Ok(FireOutcome::Created { alert_id, .. }) => summary.created.push(alert_id),
                Ok(FireOutcome::Suppressed { alert_id }) => summary.suppressed.push(alert_id),
                Err(e) => {
                    warn!(trigger = %label, error = %e, "trigger could not be dispatched");
                    summary.dispatch_errors.push(format!("{label}: {e}"));
                }
            }
        }

        info!(
            created = summary.created.len(),
            suppressed = summary.suppressed.len(),
            errors = summary.dispatch_errors.len(),
            "rule evaluation dispatched"
        );
        Ok(summary)
    }
}
