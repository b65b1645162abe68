// src/domain/model/access_level.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Nivel de acceso de un usuario. Exactamente uno por `Principal`.
///
/// El orden de declaración define el ranking (CLIENTE_VIP = 1 ... ADMIN = 10),
/// por eso `Ord` es derivado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    ClienteVip,
    Partner,
    Vendedor,
    Supervisor,
    Auditor,
    Contador,
    DirectorSucursal,
    GerenteRegional,
    DirectorGeneral,
    Admin,
}

/// Tipo de vínculo organizacional que un nivel necesita para acotar su alcance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Employee,
    Team,
    Branch,
    Region,
    Company,
    Partner,
    Customer,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BindingKind::Employee => "employee",
            BindingKind::Team => "team",
            BindingKind::Branch => "branch",
            BindingKind::Region => "region",
            BindingKind::Company => "company",
            BindingKind::Partner => "partner",
            BindingKind::Customer => "customer",
        };
        f.write_str(s)
    }
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 10] = [
        AccessLevel::Admin,
        AccessLevel::DirectorGeneral,
        AccessLevel::GerenteRegional,
        AccessLevel::DirectorSucursal,
        AccessLevel::Contador,
        AccessLevel::Auditor,
        AccessLevel::Supervisor,
        AccessLevel::Vendedor,
        AccessLevel::Partner,
        AccessLevel::ClienteVip,
    ];

    /// Ranking 1..=10 (10 = ADMIN).
    pub fn rank(self) -> u8 {
        match self {
            AccessLevel::ClienteVip => 1,
            AccessLevel::Partner => 2,
            AccessLevel::Vendedor => 3,
            AccessLevel::Supervisor => 4,
            AccessLevel::Auditor => 5,
            AccessLevel::Contador => 6,
            AccessLevel::DirectorSucursal => 7,
            AccessLevel::GerenteRegional => 8,
            AccessLevel::DirectorGeneral => 9,
            AccessLevel::Admin => 10,
        }
    }

    /// Vínculo obligatorio para el nivel; `None` para los niveles sin filtro de filas.
    pub fn required_binding(self) -> Option<BindingKind> {
        match self {
            AccessLevel::Admin
            | AccessLevel::DirectorGeneral
            | AccessLevel::Contador
            | AccessLevel::Auditor => None,
            AccessLevel::DirectorSucursal => Some(BindingKind::Branch),
            AccessLevel::GerenteRegional => Some(BindingKind::Region),
            AccessLevel::Supervisor => Some(BindingKind::Team),
            AccessLevel::Vendedor => Some(BindingKind::Employee),
            AccessLevel::Partner => Some(BindingKind::Partner),
            AccessLevel::ClienteVip => Some(BindingKind::Customer),
        }
    }

    /// Niveles que ven todas las filas (CONTADOR y AUDITOR con restricciones propias).
    pub fn is_row_unrestricted(self) -> bool {
        self.required_binding().is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::ClienteVip => "CLIENTE_VIP",
            AccessLevel::Partner => "PARTNER",
            AccessLevel::Vendedor => "VENDEDOR",
            AccessLevel::Supervisor => "SUPERVISOR",
            AccessLevel::Auditor => "AUDITOR",
            AccessLevel::Contador => "CONTADOR",
            AccessLevel::DirectorSucursal => "DIRECTOR_SUCURSAL",
            AccessLevel::GerenteRegional => "GERENTE_REGIONAL",
            AccessLevel::DirectorGeneral => "DIRECTOR_GENERAL",
            AccessLevel::Admin => "ADMIN",
        }
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = String;

    fn try_from(rank: u8) -> Result<Self, Self::Error> {
        AccessLevel::ALL
            .iter()
            .copied()
            .find(|l| l.rank() == rank)
            .ok_or_else(|| format!("access level rank {rank} out of range 1..=10"))
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        AccessLevel::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == normalized)
            .ok_or_else(|| format!("unknown access level '{s}'"))
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
