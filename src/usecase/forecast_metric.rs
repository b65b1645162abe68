// src/usecase/forecast_metric.rs
//! Pronóstico y detección de anomalías sobre la historia visible del principal.
//!
//! La historia se agrega por día (o por mes) con el alcance del solicitante,
//! así que un vendedor sólo pronostica sus propias ventas.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::domain::error::EngineError;
use crate::domain::model::forecast::{AnomalyFlag, ForecastSeries, ModelHint, TimeSeries};
use crate::domain::model::metric::{DateRange, GroupBy, MetricName};
use crate::service::forecast_engine::ForecastEngine;
use crate::service::metrics_aggregator::MetricsAggregator;
use crate::service::scope_resolver::ScopeResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMode {
    #[default]
    Forecast,
    Anomalies,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    pub metric: String,
    /// Inicio y fin de la historia usada.
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default = "default_horizon")]
    pub horizon_days: u32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub monthly: bool,
    #[serde(default)]
    pub mode: ForecastMode,
}

fn default_horizon() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecastOutcome {
    Forecast(ForecastSeries),
    Anomalies { metric: String, model: String, flags: Vec<AnomalyFlag> },
}

pub struct ForecastMetricUseCase {
    aggregator: Arc<MetricsAggregator>,
    engine: Arc<ForecastEngine>,
    resolver: ScopeResolver,
}

impl ForecastMetricUseCase {
    pub fn new(aggregator: Arc<MetricsAggregator>, engine: Arc<ForecastEngine>, resolver: ScopeResolver) -> Self {
        Self { aggregator, engine, resolver }
    }

    #[instrument(skip(self, req), fields(metric = %req.metric, horizon = req.horizon_days))]
    pub async fn execute(&self, principal_id: &str, req: ForecastRequest) -> Result<ForecastOutcome, EngineError> {
        let metric = MetricName::from_str(&req.metric)?;
        let hint = match req.model.as_deref() {
            Some(m) => ModelHint::from_str(m)?,
            None => ModelHint::Auto,
        };
        let range = DateRange::new(req.start, req.end)?;
        let scope = self.resolver.resolve_id(principal_id)?;
        let group_by = if req.monthly { GroupBy::Month } else { GroupBy::Day };

        let history = self.aggregator.compute(metric, range, group_by, &scope, None).await?;
        let series = TimeSeries::from_metric_result(&history)?;
        let engine = self.engine.clone();

        let outcome = match req.mode {
            ForecastMode::Forecast => {
                let horizon = req.horizon_days;
                let forecast = tokio::task::spawn_blocking(move || engine.forecast(&series, horizon, hint))
                    .await
                    .map_err(|e| EngineError::Internal(e.to_string()))??;
                info!(model = %forecast.model_id, points = forecast.points.len(), "forecast computed");
                ForecastOutcome::Forecast(forecast)
            }
            ForecastMode::Anomalies => {
                let name = series.metric.clone();
                let flags = tokio::task::spawn_blocking(move || engine.detect_anomalies(&series, hint))
                    .await
                    .map_err(|e| EngineError::Internal(e.to_string()))??;
                info!(flags = flags.iter().filter(|f| f.is_anomaly).count(), "anomaly scan computed");
                ForecastOutcome::Anomalies { metric: name, model: hint.to_string(), flags }
            }
        };
        Ok(outcome)
    }
}
