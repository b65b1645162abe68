// src/domain/model/principal.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::error::ScopeError;
use crate::domain::model::access_level::{AccessLevel, BindingKind};
use crate::domain::model::channel::ChannelId;
use crate::domain::model::ids::{
    BranchId, CompanyId, CustomerId, EmployeeId, PartnerId, RegionId, TeamId,
};

/// Vínculos organizacionales explícitos de un usuario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeBindings {
    #[serde(default)]
    pub employee_id: Option<EmployeeId>,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub region_id: Option<RegionId>,
    #[serde(default)]
    pub company_id: Option<CompanyId>,
    #[serde(default)]
    pub partner_id: Option<PartnerId>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
}

impl ScopeBindings {
    pub fn employee(id: u64) -> Self {
        Self { employee_id: Some(EmployeeId(id)), ..Self::default() }
    }

    pub fn team(id: u64) -> Self {
        Self { team_id: Some(TeamId(id)), ..Self::default() }
    }

    pub fn branch(id: u64) -> Self {
        Self { branch_id: Some(BranchId(id)), ..Self::default() }
    }

    pub fn region(id: u64) -> Self {
        Self { region_id: Some(RegionId(id)), ..Self::default() }
    }

    pub fn partner(id: u64) -> Self {
        Self { partner_id: Some(PartnerId(id)), ..Self::default() }
    }

    pub fn customer(id: u64) -> Self {
        Self { customer_id: Some(CustomerId(id)), ..Self::default() }
    }

    /// Tipos de vínculo presentes, en orden estable.
    pub fn bound_kinds(&self) -> Vec<BindingKind> {
        let mut kinds = Vec::new();
        if self.employee_id.is_some() {
            kinds.push(BindingKind::Employee);
        }
        if self.team_id.is_some() {
            kinds.push(BindingKind::Team);
        }
        if self.branch_id.is_some() {
            kinds.push(BindingKind::Branch);
        }
        if self.region_id.is_some() {
            kinds.push(BindingKind::Region);
        }
        if self.company_id.is_some() {
            kinds.push(BindingKind::Company);
        }
        if self.partner_id.is_some() {
            kinds.push(BindingKind::Partner);
        }
        if self.customer_id.is_some() {
            kinds.push(BindingKind::Customer);
        }
        kinds
    }

    pub fn has(&self, kind: BindingKind) -> bool {
        self.bound_kinds().contains(&kind)
    }
}

/// Usuario del sistema con exactamente un `AccessLevel`.
///
/// Invariante: los vínculos explícitos sólo pueden ser del tipo que exige el
/// nivel (VENDEDOR sólo empleado, DIRECTOR_SUCURSAL sólo sucursal...). Los
/// niveles sin filtro de filas no aceptan vínculos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub level: AccessLevel,
    #[serde(default)]
    pub bindings: ScopeBindings,
    /// Direcciones por canal (email, teléfono, webhook...). No forman parte del alcance.
    #[serde(default)]
    pub contacts: BTreeMap<ChannelId, String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, level: AccessLevel, bindings: ScopeBindings) -> Result<Self, ScopeError> {
        let principal = Self {
            id: id.into(),
            level,
            bindings,
            contacts: BTreeMap::new(),
        };
        principal.validate()?;
        Ok(principal)
    }

    pub fn with_contact(mut self, channel: ChannelId, address: impl Into<String>) -> Self {
        self.contacts.insert(channel, address.into());
        self
    }

    /// Verifica la consistencia vínculos / nivel (usado también tras deserializar).
    pub fn validate(&self) -> Result<(), ScopeError> {
        let allowed = self.level.required_binding();
        for kind in self.bindings.bound_kinds() {
            if Some(kind) != allowed {
                return Err(ScopeError::InconsistentBinding {
                    principal: self.id.clone(),
                    level: self.level,
                    kind,
                });
            }
        }
        Ok(())
    }

    pub fn contact(&self, channel: ChannelId) -> Option<&str> {
        self.contacts.get(&channel).map(String::as_str)
    }
}
