// src/service/forecast_engine.rs
//! Motor de pronóstico y detección de anomalías.
//!
//! - `forecast`: valida historia mínima y horizonte, rechaza series
//!   degeneradas, elige modelo (o hace backtest en `auto`) y construye
//!   intervalos que siempre contienen la estimación.
//! - `detect_anomalies`: con menos de `MIN_ANOMALY_POINTS` devuelve lista vacía.
//!
//! Cálculo síncrono y puro: quien llama decide cuándo recalcular y lo ejecuta
//! fuera de los hilos de peticiones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::config::app_config::ForecastConfig;
use crate::domain::error::ForecastError;
use crate::domain::model::forecast::{
    AnomalyFlag, ForecastPoint, ForecastSeries, ModelHint, TimeSeries,
};
use crate::service::forecast::autoregressive::Autoregressive;
use crate::service::forecast::holt::Holt;
use crate::service::forecast::isolation::Isolation;
use crate::service::forecast::seasonal_residual::SeasonalResidual;
use crate::service::forecast::stats::{confidence_for_z, is_constant, smape};
use crate::service::forecast::trend_seasonal::TrendSeasonal;
use crate::service::forecast::zscore::ZScore;
use crate::service::forecast::{Capability, ForecastModel, ModelForecast};
use crate::telemetry::metrics as telemetry;

/// Puntos mínimos para puntuar anomalías.
pub const MIN_ANOMALY_POINTS: usize = 8;

#[derive(Clone)]
pub struct ForecastEngine {
    models: HashMap<ModelHint, Arc<dyn ForecastModel>>,
    forecasters: Vec<ModelHint>,
    confidence_z: f64,
    max_horizon_days: u32,
    anomaly_latency_target: Duration,
}

impl ForecastEngine {
    pub fn new(cfg: &ForecastConfig) -> Self {
        let mut models: HashMap<ModelHint, Arc<dyn ForecastModel>> = HashMap::new();
        models.insert(ModelHint::TrendSeasonal, Arc::new(TrendSeasonal));
        models.insert(ModelHint::Autoregressive, Arc::new(Autoregressive::default()));
        models.insert(ModelHint::Holt, Arc::new(Holt));
        models.insert(
            ModelHint::ZScore,
            Arc::new(ZScore { scale: cfg.zscore_scale, threshold: cfg.anomaly_score_threshold }),
        );
        models.insert(
            ModelHint::SeasonalResidual,
            Arc::new(SeasonalResidual { scale: cfg.zscore_scale, threshold: cfg.anomaly_score_threshold }),
        );
        models.insert(
            ModelHint::Isolation,
            Arc::new(Isolation {
                trees: cfg.isolation_trees,
                sample_size: cfg.isolation_sample_size,
                seed: cfg.isolation_seed,
                threshold: cfg.isolation_score_threshold,
            }),
        );
        Self {
            models,
            forecasters: vec![ModelHint::TrendSeasonal, ModelHint::Autoregressive, ModelHint::Holt],
            confidence_z: cfg.confidence_z,
            max_horizon_days: cfg.max_horizon_days,
            anomaly_latency_target: Duration::from_secs(cfg.anomaly_latency_target_secs),
        }
    }

    /// Registra o reemplaza la variante asociada a `hint`.
    pub fn with_model(mut self, hint: ModelHint, model: Arc<dyn ForecastModel>) -> Self {
        if model.supports(Capability::PointForecast) && !self.forecasters.contains(&hint) {
            self.forecasters.push(hint);
        }
        self.models.insert(hint, model);
        self
    }

    fn model(&self, hint: ModelHint) -> Result<&Arc<dyn ForecastModel>, ForecastError> {
        self.models
            .get(&hint)
            .ok_or_else(|| ForecastError::UnknownModel(hint.to_string()))
    }

    #[instrument(skip(self, series), fields(metric = %series.metric, points = series.len(), hint = %hint))]
    pub fn forecast(&self, series: &TimeSeries, horizon_days: u32, hint: ModelHint) -> Result<ForecastSeries, ForecastError> {
        let result = self.forecast_inner(series, horizon_days, hint);
        match &result {
            Ok(f) => telemetry::record_forecast(&f.model_id, true),
            Err(e) => {
                telemetry::record_forecast(hint.as_str(), false);
                debug!(error = %e, "forecast rejected");
            }
        }
        result
    }

    fn forecast_inner(&self, series: &TimeSeries, horizon_days: u32, hint: ModelHint) -> Result<ForecastSeries, ForecastError> {
        if horizon_days == 0 || horizon_days > self.max_horizon_days {
            return Err(ForecastError::InvalidHorizon { horizon_days, max_days: self.max_horizon_days });
        }
        let required = series.cadence.min_history();
        let values = series.values();
        if values.len() < required {
            return Err(ForecastError::InsufficientHistory {
                model: hint.to_string(),
                required,
                actual: values.len(),
            });
        }
        if is_constant(&values) {
            return Err(ForecastError::DegenerateSeries {
                model: hint.to_string(),
                reason: "series has zero variance".into(),
            });
        }

        let season = series.cadence.season_length();
        let horizon = series.cadence.periods_for_days(horizon_days);

        let (chosen, accuracy) = match hint {
            ModelHint::Auto => self.select_by_backtest(&values, season)?,
            explicit => {
                let model = self.model(explicit)?;
                if !model.supports(Capability::PointForecast) {
                    return Err(model.unsupported(Capability::PointForecast));
                }
                let accuracy = backtest(model.as_ref(), &values, season).unwrap_or(0.0);
                (explicit, accuracy)
            }
        };
        let model = self.model(chosen)?;
        let raw: ModelForecast = model.forecast(&values, season, horizon)?;

        let last = series
            .last_period()
            .ok_or_else(|| ForecastError::InvalidSeries("empty series".into()))?;
        let mut period = last;
        let points = raw
            .values
            .iter()
            .zip(&raw.sigma)
            .map(|(v, s)| {
                period = series.cadence.next(period);
                ForecastPoint::bracketed(period, *v, self.confidence_z * s)
            })
            .collect();

        Ok(ForecastSeries {
            metric: series.metric.clone(),
            model_id: model.id().to_string(),
            cadence: series.cadence,
            confidence: confidence_for_z(self.confidence_z),
            accuracy,
            refresh: model.refresh(),
            history_points: values.len(),
            points,
        })
    }

    /// Elige el pronosticador de menor sMAPE sobre el tramo reservado.
    fn select_by_backtest(&self, values: &[f64], season: usize) -> Result<(ModelHint, f64), ForecastError> {
        let mut best: Option<(ModelHint, f64)> = None;
        for hint in &self.forecasters {
            let Some(model) = self.models.get(hint) else { continue };
            match backtest(model.as_ref(), values, season) {
                Ok(acc) => {
                    debug!(model = model.id(), accuracy = acc, "backtest");
                    if best.map_or(true, |(_, b)| acc > b) {
                        best = Some((*hint, acc));
                    }
                }
                Err(e) => debug!(model = model.id(), error = %e, "backtest failed"),
            }
        }
        best.ok_or_else(|| ForecastError::DegenerateSeries {
            model: ModelHint::Auto.to_string(),
            reason: "no forecaster could fit the series".into(),
        })
    }

    #[instrument(skip(self, series), fields(metric = %series.metric, points = series.len(), hint = %hint))]
    pub fn detect_anomalies(&self, series: &TimeSeries, hint: ModelHint) -> Result<Vec<AnomalyFlag>, ForecastError> {
        let started = Instant::now();
        let values = series.values();
        let season = series.cadence.season_length();

        let chosen = match hint {
            ModelHint::Auto if values.len() >= 2 * season => ModelHint::SeasonalResidual,
            ModelHint::Auto => ModelHint::ZScore,
            explicit => explicit,
        };
        let model = self.model(chosen)?;
        if !model.supports(Capability::AnomalyScore) {
            return Err(model.unsupported(Capability::AnomalyScore));
        }
        if values.len() < MIN_ANOMALY_POINTS {
            return Ok(Vec::new());
        }

        let threshold = model.threshold();
        let flags: Vec<AnomalyFlag> = model
            .score(&values, season)?
            .into_iter()
            .zip(&series.points)
            .map(|(s, p)| AnomalyFlag {
                period_start: p.period_start,
                value: p.value,
                expected: s.expected,
                score: s.score,
                threshold,
                is_anomaly: s.score >= threshold,
                model_id: model.id().to_string(),
            })
            .collect();

        let flagged = flags.iter().filter(|f| f.is_anomaly).count();
        telemetry::record_anomalies(model.id(), flagged);
        let elapsed = started.elapsed();
        if elapsed > self.anomaly_latency_target {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "anomaly detection over latency target");
        }
        Ok(flags)
    }
}

/// Precisión (1 - sMAPE) reentrenando sin el último tramo.
fn backtest(model: &dyn ForecastModel, values: &[f64], season: usize) -> Result<f64, ForecastError> {
    let holdout = season.min(values.len() / 5).max(1);
    let split = values.len() - holdout;
    let fitted = model.forecast(&values[..split], season, holdout)?;
    Ok(1.0 - smape(&values[split..], &fitted.values))
}
