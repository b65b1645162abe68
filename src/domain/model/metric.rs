// src/domain/model/metric.rs
//! Nombres de métricas, dimensiones de agrupación y el `MetricResult` cacheable.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::error::MetricsError;
use crate::domain::model::booking::{BookingRecord, ProductType};
use crate::domain::model::ids::{BranchId, CompanyId, EmployeeId, PartnerId, RegionId};
use crate::domain::model::scope_filter::{ColumnMask, OrgFacts};

/// Capa de comisión a sumar en `comisiones`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommissionLevel {
    All,
    Employee,
    ThirdParty,
    Partner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricName {
    VentasNetas,
    VentasBrutas,
    Comisiones(CommissionLevel),
    Pasajeros,
    Reservas,
    TicketPromedio,
}

impl MetricName {
    /// Métricas monetarias (las únicas visibles con máscara `FinancialOnly`).
    pub fn is_financial(self) -> bool {
        !matches!(self, MetricName::Pasajeros | MetricName::Reservas)
    }

    pub fn allowed_by(self, mask: ColumnMask) -> bool {
        match mask {
            ColumnMask::Full => true,
            ColumnMask::FinancialOnly => self.is_financial(),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricName::VentasNetas => "ventas_netas",
            MetricName::VentasBrutas => "ventas_brutas",
            MetricName::Comisiones(CommissionLevel::All) => "comisiones",
            MetricName::Comisiones(CommissionLevel::Employee) => "comisiones:empleado",
            MetricName::Comisiones(CommissionLevel::ThirdParty) => "comisiones:terceros",
            MetricName::Comisiones(CommissionLevel::Partner) => "comisiones:partner",
            MetricName::Pasajeros => "pasajeros",
            MetricName::Reservas => "reservas",
            MetricName::TicketPromedio => "ticket_promedio",
        };
        f.write_str(s)
    }
}

impl FromStr for MetricName {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let metric = match normalized.as_str() {
            "ventas_netas" => MetricName::VentasNetas,
            "ventas_brutas" => MetricName::VentasBrutas,
            "comisiones" => MetricName::Comisiones(CommissionLevel::All),
            "comisiones:empleado" | "comisiones:employee" => MetricName::Comisiones(CommissionLevel::Employee),
            "comisiones:terceros" | "comisiones:third_party" => MetricName::Comisiones(CommissionLevel::ThirdParty),
            "comisiones:partner" => MetricName::Comisiones(CommissionLevel::Partner),
            "pasajeros" => MetricName::Pasajeros,
            "reservas" => MetricName::Reservas,
            "ticket_promedio" => MetricName::TicketPromedio,
            _ => return Err(MetricsError::UnknownMetric { name: s.to_string() }),
        };
        Ok(metric)
    }
}

impl Serialize for MetricName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MetricName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Rango de fechas inclusivo `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, MetricsError> {
        if start > end {
            return Err(MetricsError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

impl<'de> Deserialize<'de> for DateRange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            start: NaiveDate,
            end: NaiveDate,
        }
        let raw = Raw::deserialize(deserializer)?;
        DateRange::new(raw.start, raw.end).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Total,
    Employee,
    Branch,
    Region,
    Company,
    Partner,
    ProductType,
    Day,
    Month,
}

impl GroupBy {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupBy::Total => "total",
            GroupBy::Employee => "employee",
            GroupBy::Branch => "branch",
            GroupBy::Region => "region",
            GroupBy::Company => "company",
            GroupBy::Partner => "partner",
            GroupBy::ProductType => "product_type",
            GroupBy::Day => "day",
            GroupBy::Month => "month",
        }
    }

    pub fn key_for(self, record: &BookingRecord) -> GroupKey {
        match self {
            GroupBy::Total => GroupKey::Total,
            GroupBy::Employee => GroupKey::Employee(record.employee_id),
            GroupBy::Branch => GroupKey::Branch(record.branch_id),
            GroupBy::Region => GroupKey::Region(record.region_id),
            GroupBy::Company => GroupKey::Company(record.company_id),
            GroupBy::Partner => GroupKey::Partner(record.partner_id),
            GroupBy::ProductType => GroupKey::ProductType(record.product_type),
            GroupBy::Day => GroupKey::Day(record.sale_date()),
            GroupBy::Month => {
                let d = record.sale_date();
                GroupKey::Month { year: d.year(), month: d.month() }
            }
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupBy {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let g = match s.trim().to_ascii_lowercase().as_str() {
            "" | "total" | "none" => GroupBy::Total,
            "employee" | "empleado" => GroupBy::Employee,
            "branch" | "sucursal" => GroupBy::Branch,
            "region" => GroupBy::Region,
            "company" | "empresa" => GroupBy::Company,
            "partner" => GroupBy::Partner,
            "product_type" | "service_type" => GroupBy::ProductType,
            "day" | "daily" => GroupBy::Day,
            "month" | "monthly" => GroupBy::Month,
            _ => return Err(MetricsError::UnknownGroupBy { name: s.to_string() }),
        };
        Ok(g)
    }
}

/// Clave concreta de una fila agrupada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Total,
    Employee(EmployeeId),
    Branch(BranchId),
    Region(RegionId),
    Company(CompanyId),
    /// `None` agrupa las ventas directas (sin partner).
    Partner(Option<PartnerId>),
    ProductType(ProductType),
    Day(NaiveDate),
    Month { year: i32, month: u32 },
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Total => f.write_str("total"),
            GroupKey::Employee(id) => write!(f, "{id}"),
            GroupKey::Branch(id) => write!(f, "{id}"),
            GroupKey::Region(id) => write!(f, "{id}"),
            GroupKey::Company(id) => write!(f, "{id}"),
            GroupKey::Partner(Some(id)) => write!(f, "{id}"),
            GroupKey::Partner(None) => f.write_str("partner:direct"),
            GroupKey::ProductType(p) => write!(f, "product:{p}"),
            GroupKey::Day(d) => write!(f, "{d}"),
            GroupKey::Month { year, month } => write!(f, "{year:04}-{month:02}"),
        }
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub key: GroupKey,
    pub value: Decimal,
    /// Desglose por capa de comisión o por tipo de servicio, según la métrica.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub breakdown: BTreeMap<String, Decimal>,
    pub bookings: u64,
    /// Datos organizacionales de los registros de la fila; usados para elegir destinatarios de alertas.
    #[serde(skip)]
    pub origin: BTreeSet<OrgFacts>,
}

/// Agregado nombrado sobre un conjunto de registros, rango y agrupación.
///
/// No lleva marca temporal: dos cálculos sin ingesta intermedia son iguales.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub metric: MetricName,
    pub range: DateRange,
    pub group_by: GroupBy,
    /// Moneda del resultado; `None` para conteos.
    pub currency: Option<String>,
    /// Instantánea aplicada si hubo conversión.
    pub rate_snapshot: Option<String>,
    pub scope: String,
    pub rows: Vec<MetricRow>,
    pub total: Decimal,
    pub bookings: u64,
    /// Registros subyacentes, ordenados.
    #[serde(skip)]
    pub record_ids: Vec<Uuid>,
}

impl MetricResult {
    pub fn row(&self, key: &GroupKey) -> Option<&MetricRow> {
        self.rows.iter().find(|r| &r.key == key)
    }

    pub fn origin(&self) -> BTreeSet<OrgFacts> {
        self.rows.iter().flat_map(|r| r.origin.iter().copied()).collect()
    }
}
