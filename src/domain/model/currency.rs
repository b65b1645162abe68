// src/domain/model/currency.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Instantánea registrada de tipos de cambio.
///
/// Las agregaciones multi-moneda usan siempre una instantánea identificada (nunca
/// una cotización en vivo) para que un mismo reporte sea reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRateSnapshot {
    pub id: String,
    /// Moneda de reporte (ISO 4217).
    pub base: String,
    pub as_of: DateTime<Utc>,
    /// Unidades de `base` por 1 unidad de la moneda clave.
    pub rates: BTreeMap<String, Decimal>,
}

impl ExchangeRateSnapshot {
    pub fn new(id: impl Into<String>, base: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            base: normalize_currency(&base.into()),
            as_of,
            rates: BTreeMap::new(),
        }
    }

    pub fn with_rate(mut self, currency: &str, rate: Decimal) -> Self {
        self.rates.insert(normalize_currency(currency), rate);
        self
    }

    pub fn rate_for(&self, currency: &str) -> Option<Decimal> {
        let code = normalize_currency(currency);
        if code == self.base {
            return Some(Decimal::ONE);
        }
        self.rates.get(&code).copied()
    }

    /// Convierte `amount` expresado en `currency` a la moneda base.
    pub fn convert(&self, amount: Decimal, currency: &str) -> Option<Decimal> {
        self.rate_for(currency).map(|r| amount * r)
    }
}

pub fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
