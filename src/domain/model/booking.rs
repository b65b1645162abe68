// src/domain/model/booking.rs
//! Hecho de venta inmutable consumido por el agregador de métricas.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::error::IngestError;
use crate::domain::model::ids::{BranchId, CompanyId, CustomerId, EmployeeId, PartnerId, RegionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Flight,
    Hotel,
    Package,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Flight => "flight",
            ProductType::Hotel => "hotel",
            ProductType::Package => "package",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flight" | "vuelo" => Ok(ProductType::Flight),
            "hotel" => Ok(ProductType::Hotel),
            "package" | "paquete" => Ok(ProductType::Package),
            other => Err(format!("unknown product type '{other}'")),
        }
    }
}

/// Capas de comisión que separan el importe bruto del neto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionBreakdown {
    #[serde(default)]
    pub employee: Decimal,
    #[serde(default)]
    pub third_party: Decimal,
    #[serde(default)]
    pub partner: Decimal,
}

impl CommissionBreakdown {
    pub fn total(&self) -> Decimal {
        self.employee + self.third_party + self.partner
    }
}

/// Un servicio vendido. Se crea en el momento de la venta y nunca se modifica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Uuid,
    pub sold_at: DateTime<Utc>,
    pub currency: String,
    pub net_amount: Decimal,
    pub gross_amount: Decimal,
    #[serde(default)]
    pub commissions: CommissionBreakdown,
    pub employee_id: EmployeeId,
    pub branch_id: BranchId,
    pub region_id: RegionId,
    pub company_id: CompanyId,
    #[serde(default)]
    pub partner_id: Option<PartnerId>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    pub product_type: ProductType,
    pub passengers: u32,
}

impl BookingRecord {
    pub fn sale_date(&self) -> NaiveDate {
        self.sold_at.date_naive()
    }

    /// Reglas de ingesta: importes no negativos, bruto = neto + comisiones,
    /// al menos un pasajero y moneda ISO de tres letras.
    pub fn validate(&self) -> Result<(), IngestError> {
        let reject = |reason: String| IngestError::InvalidRecord { id: self.id, reason };

        let c = &self.commissions;
        for (field, v) in [
            ("net_amount", self.net_amount),
            ("gross_amount", self.gross_amount),
            ("commissions.employee", c.employee),
            ("commissions.third_party", c.third_party),
            ("commissions.partner", c.partner),
        ] {
            if v.is_sign_negative() && !v.is_zero() {
                return Err(reject(format!("{field} is negative ({v})")));
            }
        }

        if self.gross_amount != self.net_amount + c.total() {
            return Err(reject(format!(
                "gross {} != net {} + commissions {}",
                self.gross_amount,
                self.net_amount,
                c.total()
            )));
        }

        if c.partner > Decimal::ZERO && self.partner_id.is_none() {
            return Err(reject("partner commission without partner_id".into()));
        }

        if self.passengers == 0 {
            return Err(reject("passengers must be at least 1".into()));
        }

        let code = self.currency.trim();
        if code.len() != 3 || !code.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(reject(format!("invalid currency code '{}'", self.currency)));
        }

        Ok(())
    }
}
