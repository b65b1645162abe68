// src/usecase/generate_report.rs
//! Reporte de una métrica con el alcance del principal que lo pide.
//!
//! JSON y CSV se generan aquí; PDF y Excel los produce la capa de presentación
//! a partir del resultado estructurado.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::error::EngineError;
use crate::domain::model::currency::ExchangeRateSnapshot;
use crate::domain::model::metric::{DateRange, GroupBy, MetricName, MetricResult};
use crate::service::metrics_aggregator::MetricsAggregator;
use crate::service::scope_resolver::ScopeResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
    Pdf,
    Excel,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Pdf => "pdf",
            ReportFormat::Excel => "excel",
        })
    }
}

/// `{metric, dateRange, groupBy, format}`. Los nombres se validan aquí para
/// devolver errores tipados (métrica o agrupación desconocida, rango inválido).
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub metric: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default)]
    pub rates: Option<ExchangeRateSnapshot>,
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub format: ReportFormat,
    pub content_type: &'static str,
    pub body: String,
    pub result: Arc<MetricResult>,
}

pub struct GenerateReportUseCase {
    aggregator: Arc<MetricsAggregator>,
    resolver: ScopeResolver,
}

impl GenerateReportUseCase {
    pub fn new(aggregator: Arc<MetricsAggregator>, resolver: ScopeResolver) -> Self {
        Self { aggregator, resolver }
    }

    #[instrument(skip(self, req), fields(metric = %req.metric, format = %req.format))]
    pub async fn execute(&self, principal_id: &str, req: ReportRequest) -> Result<RenderedReport, EngineError> {
        if matches!(req.format, ReportFormat::Pdf | ReportFormat::Excel) {
            return Err(EngineError::UnsupportedFormat(req.format.to_string()));
        }
        let metric = MetricName::from_str(&req.metric)?;
        let group_by = match req.group_by.as_deref() {
            Some(g) => GroupBy::from_str(g)?,
            None => GroupBy::Total,
        };
        let range = DateRange::new(req.start, req.end)?;
        let scope = self.resolver.resolve_id(principal_id)?;

        let result = self.aggregator.compute(metric, range, group_by, &scope, req.rates.as_ref()).await?;
        let (content_type, body) = match req.format {
            ReportFormat::Csv => ("text/csv; charset=utf-8", render_csv(&result)?),
            _ => (
                "application/json",
                serde_json::to_string(result.as_ref()).map_err(|e| EngineError::Internal(e.to_string()))?,
            ),
        };
        debug!(rows = result.rows.len(), bytes = body.len(), "report rendered");
        Ok(RenderedReport { format: req.format, content_type, body, result })
    }
}

/// Una fila por grupo; las claves de desglose se vuelven columnas.
pub fn render_csv(result: &MetricResult) -> Result<String, EngineError> {
    let internal = |e: csv::Error| EngineError::Internal(e.to_string());
    let mut breakdown_keys: Vec<&String> = result.rows.iter().flat_map(|r| r.breakdown.keys()).collect();
    breakdown_keys.sort();
    breakdown_keys.dedup();

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![result.group_by.to_string(), result.metric.to_string(), "bookings".into(), "currency".into()];
    header.extend(breakdown_keys.iter().map(|k| k.to_string()));
    writer.write_record(&header).map_err(internal)?;

    let currency = result.currency.clone().unwrap_or_default();
    for row in &result.rows {
        let mut record = vec![row.key.to_string(), row.value.to_string(), row.bookings.to_string(), currency.clone()];
        record.extend(
            breakdown_keys
                .iter()
                .map(|k| row.breakdown.get(*k).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record).map_err(internal)?;
    }

    let bytes = writer.into_inner().map_err(|e| EngineError::Internal(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| EngineError::Internal(e.to_string()))
}
