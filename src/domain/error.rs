// src/domain/error.rs
//! Taxonomía de errores del motor de reportes y alertas.
//!
//! Cada componente expone su propio enum (`ScopeError`, `MetricsError`,
//! `ForecastError`, ...) con el contexto suficiente para reintentar o reportar
//! (métrica, alcance, rango de fechas, alerta, canal). `EngineError` los agrupa
//! para las capas de casos de uso y HTTP.

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::model::access_level::{AccessLevel, BindingKind};
use crate::domain::model::channel::ChannelId;

/// Nivel de criticidad del error para clasificación operativa
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorImpact {
    Recoverable,    // Puede reintentarse o aplicar fallback
    NonRecoverable, // El llamador debe corregir la petición
}

/// Errores del resolvedor de alcance. Nunca se "arreglan" ampliando o vaciando el filtro.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("principal '{principal}' ({level}) has no {required} binding")]
    MissingBinding {
        principal: String,
        level: AccessLevel,
        required: BindingKind,
    },

    #[error("principal '{principal}' ({level}) cannot carry a {kind} binding")]
    InconsistentBinding {
        principal: String,
        level: AccessLevel,
        kind: BindingKind,
    },

    #[error("unknown principal '{0}'")]
    UnknownPrincipal(String),

    #[error("scope of principal '{principal}' ({level}) is read-only")]
    ReadOnly { principal: String, level: AccessLevel },

    #[error("principal '{principal}' ({level}) may not {action}")]
    Forbidden { principal: String, level: AccessLevel, action: String },

    #[error("org directory lookup failed: {0}")]
    Directory(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("unknown metric '{name}'")]
    UnknownMetric { name: String },

    #[error("unknown group-by dimension '{name}'")]
    UnknownGroupBy { name: String },

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("metric '{metric}' is outside the financial column mask of scope {scope}")]
    ColumnRestricted { metric: String, scope: String },

    #[error("no exchange rate for {currency} in snapshot '{snapshot}'")]
    MissingExchangeRate { currency: String, snapshot: String },

    #[error("booking store failed computing '{metric}' for {scope} over {range}: {message}")]
    Store {
        metric: String,
        scope: String,
        range: String,
        message: String,
    },

    #[error("computation of '{metric}' for {scope} over {range} timed out")]
    Timeout {
        metric: String,
        scope: String,
        range: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("model '{model}' needs at least {required} periods of history, got {actual}")]
    InsufficientHistory {
        model: String,
        required: usize,
        actual: usize,
    },

    #[error("model '{model}' cannot fit a degenerate series: {reason}")]
    DegenerateSeries { model: String, reason: String },

    #[error("invalid series: {0}")]
    InvalidSeries(String),

    #[error("horizon of {horizon_days} days is outside 1..={max_days}")]
    InvalidHorizon { horizon_days: u32, max_days: u32 },

    #[error("unknown model hint '{0}'")]
    UnknownModel(String),

    #[error("model '{model}' does not provide {capability}")]
    CapabilityUnsupported { model: String, capability: String },
}

/// Resultado no exitoso de un envío a un adaptador de canal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Error transitorio: se reintenta según la política del canal.
    #[error("transient failure on {channel}: {message}")]
    Transient { channel: ChannelId, message: String },

    /// Rechazo definitivo del proveedor (destinatario inválido, payload rechazado...).
    #[error("{channel} rejected the notification: {message}")]
    Rejected { channel: ChannelId, message: String },

    #[error("no adapter registered for channel {channel}")]
    NoAdapter { channel: ChannelId },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("alert {0} not found")]
    AlertNotFound(Uuid),

    #[error("alert {alert_id} has no delivery on channel {channel}")]
    UnknownDelivery { alert_id: Uuid, channel: ChannelId },

    #[error("alert store failure: {0}")]
    Store(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("booking {id} rejected: {reason}")]
    InvalidRecord { id: Uuid, reason: String },

    #[error("booking {0} already ingested; records are immutable")]
    DuplicateRecord(Uuid),

    #[error("booking store failure: {0}")]
    Store(String),
}

/// Error agregado que cruzan los casos de uso y la API.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("report format '{0}' is rendered by the presentation layer")]
    UnsupportedFormat(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Internal(format!("{e:#}"))
    }
}

impl EngineError {
    /// Código estable para clientes y métricas.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Scope(ScopeError::ReadOnly { .. }) => "read_only_scope",
            EngineError::Scope(ScopeError::UnknownPrincipal(_)) => "unknown_principal",
            EngineError::Scope(ScopeError::Forbidden { .. }) => "forbidden",
            EngineError::Scope(ScopeError::Directory(_)) => "directory_unavailable",
            EngineError::Scope(_) => "scope_error",
            EngineError::Metrics(MetricsError::UnknownMetric { .. }) => "unknown_metric",
            EngineError::Metrics(MetricsError::UnknownGroupBy { .. }) => "unknown_group_by",
            EngineError::Metrics(MetricsError::InvalidRange { .. }) => "invalid_range",
            EngineError::Metrics(MetricsError::ColumnRestricted { .. }) => "column_restricted",
            EngineError::Metrics(MetricsError::MissingExchangeRate { .. }) => "missing_exchange_rate",
            EngineError::Metrics(MetricsError::Store { .. }) => "store_unavailable",
            EngineError::Metrics(MetricsError::Timeout { .. }) => "timeout",
            EngineError::Forecast(ForecastError::InsufficientHistory { .. }) => "insufficient_history",
            EngineError::Forecast(ForecastError::DegenerateSeries { .. }) => "degenerate_series",
            EngineError::Forecast(ForecastError::UnknownModel(_)) => "unknown_model",
            EngineError::Forecast(_) => "invalid_forecast_request",
            EngineError::Delivery(_) => "delivery_error",
            EngineError::Dispatch(DispatchError::AlertNotFound(_)) => "alert_not_found",
            EngineError::Dispatch(DispatchError::UnknownDelivery { .. }) => "delivery_not_found",
            EngineError::Dispatch(_) => "dispatch_error",
            EngineError::Ingest(IngestError::DuplicateRecord(_)) => "duplicate_record",
            EngineError::Ingest(IngestError::Store(_)) => "store_unavailable",
            EngineError::Ingest(_) => "invalid_record",
            EngineError::Validation(_) => "validation_error",
            EngineError::UnsupportedFormat(_) => "unsupported_format",
            EngineError::Internal(_) => "internal_error",
        }
    }

    pub fn impact(&self) -> ErrorImpact {
        match self {
            EngineError::Metrics(MetricsError::Store { .. })
            | EngineError::Metrics(MetricsError::Timeout { .. })
            | EngineError::Scope(ScopeError::Directory(_))
            | EngineError::Delivery(DeliveryError::Transient { .. })
            | EngineError::Dispatch(DispatchError::Store(_))
            | EngineError::Ingest(IngestError::Store(_))
            | EngineError::Internal(_) => ErrorImpact::Recoverable,
            _ => ErrorImpact::NonRecoverable,
        }
    }
}
