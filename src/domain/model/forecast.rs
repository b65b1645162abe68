// src/domain/model/forecast.rs
//! Series temporales, pronósticos y banderas de anomalía.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::ForecastError;
use crate::domain::model::metric::{GroupBy, GroupKey, MetricResult};

/// Periodicidad de una serie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    /// Historia mínima para pronosticar con esta periodicidad.
    pub fn min_history(self) -> usize {
        match self {
            Cadence::Daily => 14,
            Cadence::Weekly => 8,
            Cadence::Monthly => 12,
        }
    }

    /// Periodo estacional asumido por los modelos con componente estacional.
    pub fn season_length(self) -> usize {
        match self {
            Cadence::Daily => 7,
            Cadence::Weekly => 4,
            Cadence::Monthly => 12,
        }
    }

    pub fn next(self, period_start: NaiveDate) -> NaiveDate {
        match self {
            Cadence::Daily => period_start + Duration::days(1),
            Cadence::Weekly => period_start + Duration::days(7),
            Cadence::Monthly => period_start
                .checked_add_months(Months::new(1))
                .unwrap_or(period_start + Duration::days(31)),
        }
    }

    /// Periodos que cubren `days` días de horizonte (al menos uno).
    pub fn periods_for_days(self, days: u32) -> usize {
        let d = days.max(1) as usize;
        match self {
            Cadence::Daily => d,
            Cadence::Weekly => d.div_ceil(7),
            Cadence::Monthly => d.div_ceil(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub period_start: NaiveDate,
    pub value: f64,
}

/// Serie temporal de una métrica, un punto por periodo, ordenada y sin huecos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub metric: String,
    pub cadence: Cadence,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    pub fn new(metric: impl Into<String>, cadence: Cadence, points: Vec<SeriesPoint>) -> Result<Self, ForecastError> {
        for w in points.windows(2) {
            if w[0].period_start >= w[1].period_start {
                return Err(ForecastError::InvalidSeries(format!(
                    "periods must be strictly increasing ({} then {})",
                    w[0].period_start, w[1].period_start
                )));
            }
        }
        if let Some(p) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(ForecastError::InvalidSeries(format!(
                "non-finite value at {}",
                p.period_start
            )));
        }
        Ok(Self { metric: metric.into(), cadence, points })
    }

    /// Construye la serie a partir de un resultado agrupado por día o mes,
    /// rellenando con cero los periodos sin ventas dentro del rango.
    pub fn from_metric_result(result: &MetricResult) -> Result<Self, ForecastError> {
        let cadence = match result.group_by {
            GroupBy::Day => Cadence::Daily,
            GroupBy::Month => Cadence::Monthly,
            other => {
                return Err(ForecastError::InvalidSeries(format!(
                    "metric result grouped by {other} is not a time series"
                )))
            }
        };

        let mut points = Vec::new();
        let mut cursor = match cadence {
            Cadence::Monthly => result.range.start().with_day(1).unwrap_or(result.range.start()),
            _ => result.range.start(),
        };
        while cursor <= result.range.end() {
            let key = match cadence {
                Cadence::Monthly => GroupKey::Month { year: cursor.year(), month: cursor.month() },
                _ => GroupKey::Day(cursor),
            };
            let value = result
                .row(&key)
                .map(|r| decimal_to_f64(r.value))
                .unwrap_or(0.0);
            points.push(SeriesPoint { period_start: cursor, value });
            cursor = cadence.next(cursor);
        }

        TimeSeries::new(result.metric.to_string(), cadence, points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn last_period(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.period_start)
    }
}

pub fn decimal_to_f64(d: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

/// Estrategia pedida por el llamador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHint {
    Auto,
    TrendSeasonal,
    Autoregressive,
    Holt,
    #[serde(rename = "zscore", alias = "z_score")]
    ZScore,
    Isolation,
    SeasonalResidual,
}

impl ModelHint {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelHint::Auto => "auto",
            ModelHint::TrendSeasonal => "trend_seasonal",
            ModelHint::Autoregressive => "autoregressive",
            ModelHint::Holt => "holt",
            ModelHint::ZScore => "zscore",
            ModelHint::Isolation => "isolation",
            ModelHint::SeasonalResidual => "seasonal_residual",
        }
    }
}

impl fmt::Display for ModelHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelHint {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hint = match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => ModelHint::Auto,
            "trend_seasonal" | "seasonal" | "prophet" | "decomposition" => ModelHint::TrendSeasonal,
            "autoregressive" | "ar" | "arima" => ModelHint::Autoregressive,
            "holt" | "exponential_smoothing" | "ets" => ModelHint::Holt,
            "zscore" | "z_score" => ModelHint::ZScore,
            "isolation" | "isolation_forest" => ModelHint::Isolation,
            "seasonal_residual" | "residual" => ModelHint::SeasonalResidual,
            other => return Err(ForecastError::UnknownModel(other.to_string())),
        };
        Ok(hint)
    }
}

/// Frecuencia de recálculo declarada por cada modelo (la decide el llamador).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshCadence {
    RealTime,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub period_start: NaiveDate,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ForecastPoint {
    /// Construye un punto garantizando `lower <= value <= upper` y valores no negativos
    /// (las métricas de negocio no son negativas).
    pub fn bracketed(period_start: NaiveDate, value: f64, half_width: f64) -> Self {
        let value = value.max(0.0);
        let hw = if half_width.is_finite() { half_width.abs() } else { 0.0 };
        let lower = (value - hw).max(0.0);
        let upper = value + hw;
        Self { period_start, value, lower, upper }
    }

    pub fn contains(&self, v: f64) -> bool {
        self.lower <= v && v <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub metric: String,
    pub model_id: String,
    pub cadence: Cadence,
    /// Nivel de confianza nominal del intervalo (p.ej. 0.95).
    pub confidence: f64,
    /// Estimación de precisión en [0, 1] (1 - sMAPE sobre el tramo reservado).
    pub accuracy: f64,
    pub refresh: RefreshCadence,
    pub history_points: usize,
    pub points: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub period_start: NaiveDate,
    pub value: f64,
    /// Valor esperado por el modelo, cuando lo tiene.
    pub expected: Option<f64>,
    /// Puntuación en [0, 1], monótona con la desviación interna del modelo.
    pub score: f64,
    pub threshold: f64,
    pub is_anomaly: bool,
    pub model_id: String,
}
