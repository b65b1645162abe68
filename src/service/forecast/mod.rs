// src/service/forecast/mod.rs
//! Modelos intercambiables del motor de pronóstico.
//!
//! Cada modelo declara sus capacidades (pronóstico con intervalo y/o puntuación
//! de anomalía) y trabaja sobre valores ya ordenados por periodo. El motor se
//! encarga de validar la serie, construir intervalos y elegir el modelo.

pub mod autoregressive;
pub mod holt;
pub mod isolation;
pub mod seasonal_residual;
pub mod stats;
pub mod trend_seasonal;
pub mod zscore;

use crate::domain::error::ForecastError;
use crate::domain::model::forecast::RefreshCadence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    PointForecast,
    AnomalyScore,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::PointForecast => "point forecast with confidence interval",
            Capability::AnomalyScore => "anomaly score",
        }
    }
}

/// Salida cruda de un pronosticador: estimación y desviación típica del error
/// por paso de horizonte.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelForecast {
    pub values: Vec<f64>,
    pub sigma: Vec<f64>,
}

/// Puntuación de un punto de la serie.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointScore {
    pub expected: Option<f64>,
    /// Medida de desviación interna del modelo.
    pub deviation: f64,
    /// Monótona con `deviation`, en [0, 1].
    pub score: f64,
}

pub trait ForecastModel: Send + Sync + 'static {
    fn id(&self) -> &'static str;

    fn capabilities(&self) -> &'static [Capability];

    fn refresh(&self) -> RefreshCadence;

    /// Umbral de anomalía propio del modelo.
    fn threshold(&self) -> f64 {
        1.0
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn forecast(&self, _history: &[f64], _season: usize, _horizon: usize) -> Result<ModelForecast, ForecastError> {
        Err(self.unsupported(Capability::PointForecast))
    }

    fn score(&self, _values: &[f64], _season: usize) -> Result<Vec<PointScore>, ForecastError> {
        Err(self.unsupported(Capability::AnomalyScore))
    }

    fn unsupported(&self, capability: Capability) -> ForecastError {
        ForecastError::CapabilityUnsupported {
            model: self.id().to_string(),
            capability: capability.as_str().to_string(),
        }
    }
}

/// Rechaza salidas no finitas en lugar de devolver un pronóstico inventado.
pub(crate) fn ensure_finite(model: &str, out: ModelForecast) -> Result<ModelForecast, ForecastError> {
    if out.values.iter().chain(&out.sigma).all(|v| v.is_finite()) {
        Ok(out)
    } else {
        Err(ForecastError::DegenerateSeries {
            model: model.to_string(),
            reason: "model did not converge (non-finite output)".into(),
        })
    }
}
