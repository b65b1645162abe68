// src/domain/model/scope_filter.rs
//! Predicado de visibilidad derivado de un `Principal`.
//!
//! Se recalcula en cada consulta y nunca se persiste. Combina un filtro de
//! filas (`RowScope`), una máscara de columnas (`ColumnMask`) y la marca de
//! sólo-lectura que los caminos de mutación deben respetar.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::error::ScopeError;
use crate::domain::model::access_level::AccessLevel;
use crate::domain::model::booking::BookingRecord;
use crate::domain::model::ids::{
    BranchId, CompanyId, CustomerId, EmployeeId, PartnerId, RegionId, TeamId,
};

/// Campos organizacionales de un registro; lo único que un filtro de filas mira.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgFacts {
    pub employee_id: EmployeeId,
    pub branch_id: BranchId,
    pub region_id: RegionId,
    pub company_id: CompanyId,
    pub partner_id: Option<PartnerId>,
    pub customer_id: Option<CustomerId>,
}

impl From<&BookingRecord> for OrgFacts {
    fn from(r: &BookingRecord) -> Self {
        OrgFacts {
            employee_id: r.employee_id,
            branch_id: r.branch_id,
            region_id: r.region_id,
            company_id: r.company_id,
            partner_id: r.partner_id,
            customer_id: r.customer_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowScope {
    All,
    Branch { branch_id: BranchId },
    Region { region_id: RegionId },
    /// Reportes directos del equipo resueltos contra el directorio al momento de la consulta.
    Team { team_id: TeamId, members: BTreeSet<EmployeeId> },
    Employee { employee_id: EmployeeId },
    Partner { partner_id: PartnerId },
    Customer { customer_id: CustomerId },
}

impl RowScope {
    pub fn matches(&self, facts: &OrgFacts) -> bool {
        match self {
            RowScope::All => true,
            RowScope::Branch { branch_id } => facts.branch_id == *branch_id,
            RowScope::Region { region_id } => facts.region_id == *region_id,
            RowScope::Team { members, .. } => members.contains(&facts.employee_id),
            RowScope::Employee { employee_id } => facts.employee_id == *employee_id,
            RowScope::Partner { partner_id } => facts.partner_id == Some(*partner_id),
            RowScope::Customer { customer_id } => facts.customer_id == Some(*customer_id),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, RowScope::All)
    }
}

impl fmt::Display for RowScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowScope::All => f.write_str("all"),
            RowScope::Branch { branch_id } => write!(f, "branch_id={}", branch_id.get()),
            RowScope::Region { region_id } => write!(f, "region_id={}", region_id.get()),
            RowScope::Team { team_id, members } => {
                let ids: Vec<String> = members.iter().map(|e| e.get().to_string()).collect();
                write!(f, "employee_id in team {} [{}]", team_id.get(), ids.join(","))
            }
            RowScope::Employee { employee_id } => write!(f, "employee_id={}", employee_id.get()),
            RowScope::Partner { partner_id } => write!(f, "partner_id={}", partner_id.get()),
            RowScope::Customer { customer_id } => write!(f, "customer_id={}", customer_id.get()),
        }
    }
}

/// Máscara de columnas: CONTADOR ve todas las filas pero sólo columnas financieras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMask {
    Full,
    FinancialOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub principal_id: String,
    pub level: AccessLevel,
    pub rows: RowScope,
    pub columns: ColumnMask,
    pub read_only: bool,
}

impl ScopeFilter {
    pub fn matches(&self, record: &BookingRecord) -> bool {
        self.rows.matches(&OrgFacts::from(record))
    }

    pub fn matches_facts(&self, facts: &OrgFacts) -> bool {
        self.rows.matches(facts)
    }

    /// Rechaza el alcance en caminos que escriben (ingesta, reglas, confirmaciones).
    pub fn ensure_writable(&self) -> Result<(), ScopeError> {
        if self.read_only {
            return Err(ScopeError::ReadOnly {
                principal: self.principal_id.clone(),
                level: self.level,
            });
        }
        Ok(())
    }

    /// Hash estable del predicado efectivo (filas + columnas).
    ///
    /// No incluye al principal: dos usuarios con el mismo alcance comparten
    /// entradas de caché.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.rows.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(match self.columns {
            ColumnMask::Full => b"full".as_slice(),
            ColumnMask::FinancialOnly => b"financial".as_slice(),
        });
        hasher.update(b"|scope-filter-v1");
        hex::encode(hasher.finalize())
    }

    /// Descripción legible para errores y logs.
    pub fn describe(&self) -> String {
        let mut out = format!("{}[{}]", self.level, self.rows);
        if self.columns == ColumnMask::FinancialOnly {
            out.push_str(" financial-only");
        }
        if self.read_only {
            out.push_str(" read-only");
        }
        out
    }
}
