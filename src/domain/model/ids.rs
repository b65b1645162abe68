// src/domain/model/ids.rs
//! Identificadores organizacionales fuertemente tipados.
//!
//! Cada entidad del organigrama (empleado, equipo, sucursal, región, empresa,
//! partner, cliente) usa su propio newtype para que un filtro de alcance nunca
//! compare, por error, un id de sucursal con uno de región.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! org_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                $name(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }
    };
}

org_id!(
    /// Vendedor / empleado que registró la venta.
    EmployeeId,
    "employee"
);
org_id!(
    /// Equipo comercial (unidad de supervisión).
    TeamId,
    "team"
);
org_id!(
    /// Sucursal física.
    BranchId,
    "branch"
);
org_id!(RegionId, "region");
org_id!(CompanyId, "company");
org_id!(
    /// Agencia partner B2B2B.
    PartnerId,
    "partner"
);
org_id!(CustomerId, "customer");
