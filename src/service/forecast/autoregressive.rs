// src/service/forecast/autoregressive.rs
//! AR(p) sobre la serie diferenciada (un ARIMA(p, 1, 0) sin término MA).
//!
//! Coeficientes por Yule-Walker resuelto con Levinson-Durbin, que garantiza un
//! proceso estacionario para las diferencias.

use super::stats::{mean, std_dev};
use super::{ensure_finite, Capability, ForecastModel, ModelForecast};
use crate::domain::error::ForecastError;
use crate::domain::model::forecast::RefreshCadence;

pub struct Autoregressive {
    pub max_order: usize,
}

impl Default for Autoregressive {
    fn default() -> Self {
        Self { max_order: 7 }
    }
}

impl Autoregressive {
    fn order_for(&self, diffs: usize, season: usize) -> usize {
        self.max_order.min(season.max(1)).min(diffs / 3).max(1)
    }
}

fn autocovariance(xs: &[f64], lag: usize) -> f64 {
    let n = xs.len();
    if lag >= n {
        return 0.0;
    }
    xs[..n - lag].iter().zip(&xs[lag..]).map(|(a, b)| a * b).sum::<f64>() / n as f64
}

fn levinson_durbin(acov: &[f64], order: usize) -> Vec<f64> {
    let mut phi = vec![0.0; order];
    if acov[0] <= 0.0 {
        return phi;
    }
    let mut err = acov[0];
    for k in 0..order {
        let mut acc = acov[k + 1];
        for j in 0..k {
            acc -= phi[j] * acov[k - j];
        }
        let reflection = acc / err;
        let prev = phi.clone();
        phi[k] = reflection;
        for j in 0..k {
            phi[j] = prev[j] - reflection * prev[k - 1 - j];
        }
        err *= 1.0 - reflection * reflection;
        if err <= 0.0 {
            break;
        }
    }
    phi
}

impl ForecastModel for Autoregressive {
    fn id(&self) -> &'static str {
        "autoregressive"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::PointForecast]
    }

    fn refresh(&self) -> RefreshCadence {
        RefreshCadence::Daily
    }

    fn forecast(&self, history: &[f64], season: usize, horizon: usize) -> Result<ModelForecast, ForecastError> {
        let n = history.len();
        if n < 4 {
            return Err(ForecastError::InsufficientHistory { model: self.id().into(), required: 4, actual: n });
        }
        let diffs: Vec<f64> = history.windows(2).map(|w| w[1] - w[0]).collect();
        let drift = mean(&diffs);
        let centered: Vec<f64> = diffs.iter().map(|d| d - drift).collect();

        let p = self.order_for(centered.len(), season);
        let acov: Vec<f64> = (0..=p).map(|lag| autocovariance(&centered, lag)).collect();
        let phi = levinson_durbin(&acov, p);

        // Residuos de un paso dentro de la muestra.
        let residuals: Vec<f64> = (p..centered.len())
            .map(|t| centered[t] - (0..p).map(|i| phi[i] * centered[t - 1 - i]).sum::<f64>())
            .collect();
        let resid_sd = std_dev(&residuals);

        let mut lags: Vec<f64> = centered.clone();
        let mut level = history[n - 1];
        let mut values = Vec::with_capacity(horizon);
        let mut sigma = Vec::with_capacity(horizon);
        for h in 1..=horizon {
            let next: f64 = (0..p).map(|i| phi[i] * lags[lags.len() - 1 - i]).sum();
            lags.push(next);
            level += next + drift;
            values.push(level);
            // Integrar las diferencias acumula el error como un paseo aleatorio.
            sigma.push(resid_sd * (h as f64).sqrt());
        }
        ensure_finite(self.id(), ModelForecast { values, sigma })
    }
}
