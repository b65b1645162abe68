// src/service/forecast/holt.rs
//! Suavizado exponencial lineal de Holt (nivel + tendencia).
//!
//! `alpha` y `beta` se eligen en una rejilla minimizando el error cuadrático
//! de un paso.

use super::stats::std_dev;
use super::{ensure_finite, Capability, ForecastModel, ModelForecast};
use crate::domain::error::ForecastError;
use crate::domain::model::forecast::RefreshCadence;

const GRID: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];

pub struct Holt;

struct Fit {
    alpha: f64,
    level: f64,
    trend: f64,
    errors: Vec<f64>,
    sse: f64,
}

fn fit(history: &[f64], alpha: f64, beta: f64) -> Fit {
    let mut level = history[0];
    let mut trend = history[1] - history[0];
    let mut errors = Vec::with_capacity(history.len());
    for y in &history[1..] {
        let predicted = level + trend;
        errors.push(y - predicted);
        let prev_level = level;
        level = alpha * y + (1.0 - alpha) * (level + trend);
        trend = beta * (level - prev_level) + (1.0 - beta) * trend;
    }
    let sse = errors.iter().map(|e| e * e).sum();
    Fit { alpha, level, trend, errors, sse }
}

impl ForecastModel for Holt {
    fn id(&self) -> &'static str {
        "holt"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::PointForecast]
    }

    fn refresh(&self) -> RefreshCadence {
        RefreshCadence::RealTime
    }

    fn forecast(&self, history: &[f64], _season: usize, horizon: usize) -> Result<ModelForecast, ForecastError> {
        let n = history.len();
        if n < 3 {
            return Err(ForecastError::InsufficientHistory { model: self.id().into(), required: 3, actual: n });
        }
        let best = GRID
            .iter()
            .flat_map(|a| GRID.iter().map(move |b| (*a, *b)))
            .map(|(a, b)| fit(history, a, b))
            .min_by(|x, y| x.sse.total_cmp(&y.sse))
            .ok_or_else(|| ForecastError::DegenerateSeries { model: self.id().into(), reason: "empty parameter grid".into() })?;

        let err_sd = std_dev(&best.errors);
        let values = (1..=horizon).map(|h| best.level + h as f64 * best.trend).collect();
        let sigma = (1..=horizon)
            .map(|h| err_sd * (1.0 + (h as f64 - 1.0) * best.alpha * best.alpha).sqrt())
            .collect();
        ensure_finite(self.id(), ModelForecast { values, sigma })
    }
}
