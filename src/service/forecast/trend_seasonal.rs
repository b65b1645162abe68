// src/service/forecast/trend_seasonal.rs
//! Descomposición aditiva: tendencia lineal + perfil estacional.

use super::stats::{linear_fit, seasonal_profile, std_dev};
use super::{ensure_finite, Capability, ForecastModel, ModelForecast};
use crate::domain::error::ForecastError;
use crate::domain::model::forecast::RefreshCadence;

pub struct TrendSeasonal;

impl ForecastModel for TrendSeasonal {
    fn id(&self) -> &'static str {
        "trend_seasonal"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::PointForecast]
    }

    fn refresh(&self) -> RefreshCadence {
        RefreshCadence::Weekly
    }

    fn forecast(&self, history: &[f64], season: usize, horizon: usize) -> Result<ModelForecast, ForecastError> {
        let n = history.len();
        if n < 3 {
            return Err(ForecastError::InsufficientHistory { model: self.id().into(), required: 3, actual: n });
        }
        let (intercept, slope) = linear_fit(history);
        let detrended: Vec<f64> = history
            .iter()
            .enumerate()
            .map(|(t, y)| y - (intercept + slope * t as f64))
            .collect();
        let profile = seasonal_profile(&detrended, season);
        let season_at = |t: usize| profile[t % profile.len()];

        let residuals: Vec<f64> = detrended.iter().enumerate().map(|(t, d)| d - season_at(t)).collect();
        let resid_sd = std_dev(&residuals);

        let mut values = Vec::with_capacity(horizon);
        let mut sigma = Vec::with_capacity(horizon);
        for h in 1..=horizon {
            let t = n - 1 + h;
            values.push(intercept + slope * t as f64 + season_at(t));
            // La incertidumbre de la pendiente crece con la distancia.
            sigma.push(resid_sd * (1.0 + h as f64 / n as f64).sqrt());
        }
        ensure_finite(self.id(), ModelForecast { values, sigma })
    }
}
