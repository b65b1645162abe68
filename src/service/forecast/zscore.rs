// src/service/forecast/zscore.rs
//! Línea base robusta: distancia a la mediana en unidades de MAD.

use super::stats::{deviation_score, median, robust_sigma, std_dev};
use super::{Capability, ForecastModel, PointScore};
use crate::domain::error::ForecastError;
use crate::domain::model::forecast::RefreshCadence;

pub struct ZScore {
    pub scale: f64,
    pub threshold: f64,
}

/// Desviaciones robustas de cada punto respecto a `center`. Con MAD nula se usa
/// la desviación típica; con ambas nulas todas las desviaciones son cero.
pub(crate) fn robust_deviations(values: &[f64], center: f64) -> Vec<f64> {
    let mut sigma = robust_sigma(values);
    if sigma <= f64::EPSILON {
        sigma = std_dev(values);
    }
    values
        .iter()
        .map(|v| if sigma <= f64::EPSILON { 0.0 } else { (v - center).abs() / sigma })
        .collect()
}

impl ForecastModel for ZScore {
    fn id(&self) -> &'static str {
        "zscore"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::AnomalyScore]
    }

    fn refresh(&self) -> RefreshCadence {
        RefreshCadence::RealTime
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn score(&self, values: &[f64], _season: usize) -> Result<Vec<PointScore>, ForecastError> {
        let center = median(values);
        Ok(robust_deviations(values, center)
            .into_iter()
            .map(|z| PointScore { expected: Some(center), deviation: z, score: deviation_score(z, self.scale) })
            .collect())
    }
}
