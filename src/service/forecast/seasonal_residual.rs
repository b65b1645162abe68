// src/service/forecast/seasonal_residual.rs
//! Anomalías sobre el residuo de tendencia + estacionalidad.
//!
//! Un lunes flojo no es anómalo si todos los lunes lo son; sólo cuenta lo que
//! el perfil estacional no explica.

use super::stats::{deviation_score, linear_fit, seasonal_profile};
use super::zscore::robust_deviations;
use super::{Capability, ForecastModel, PointScore};
use crate::domain::error::ForecastError;
use crate::domain::model::forecast::RefreshCadence;

pub struct SeasonalResidual {
    pub scale: f64,
    pub threshold: f64,
}

impl ForecastModel for SeasonalResidual {
    fn id(&self) -> &'static str {
        "seasonal_residual"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::AnomalyScore]
    }

    fn refresh(&self) -> RefreshCadence {
        RefreshCadence::Daily
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn score(&self, values: &[f64], season: usize) -> Result<Vec<PointScore>, ForecastError> {
        let (intercept, slope) = linear_fit(values);
        let trend: Vec<f64> = (0..values.len()).map(|t| intercept + slope * t as f64).collect();
        let detrended: Vec<f64> = values.iter().zip(&trend).map(|(v, t)| v - t).collect();
        let profile = seasonal_profile(&detrended, season);

        let expected: Vec<f64> = trend
            .iter()
            .enumerate()
            .map(|(t, base)| base + profile[t % profile.len()])
            .collect();
        let residuals: Vec<f64> = values.iter().zip(&expected).map(|(v, e)| v - e).collect();

        Ok(robust_deviations(&residuals, 0.0)
            .into_iter()
            .zip(expected)
            .map(|(z, e)| PointScore { expected: Some(e), deviation: z, score: deviation_score(z, self.scale) })
            .collect())
    }
}
