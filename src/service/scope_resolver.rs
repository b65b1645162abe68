// src/service/scope_resolver.rs
//! Resolvedor de alcance: único lugar donde un `AccessLevel` se traduce a un
//! `ScopeFilter`.
//!
//! - Vínculo explícito del principal o, si falta, el del organigrama.
//! - Sin vínculo del tipo requerido => `ScopeError::MissingBinding` (nunca se
//!   amplía ni se vacía el filtro).
//! - SUPERVISOR se resuelve contra los reportes directos actuales del equipo.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::domain::error::ScopeError;
use crate::domain::model::access_level::{AccessLevel, BindingKind};
use crate::domain::model::principal::{Principal, ScopeBindings};
use crate::domain::model::scope_filter::{ColumnMask, OrgFacts, RowScope, ScopeFilter};
use crate::repository::org_directory::{Hierarchy, OrgDirectory};

/// Destinatario elegible de una alerta junto con el alcance que lo habilita.
#[derive(Debug, Clone)]
pub struct EligibleRecipient {
    pub principal: Principal,
    pub filter: ScopeFilter,
}

#[derive(Clone)]
pub struct ScopeResolver {
    directory: Arc<dyn OrgDirectory>,
}

impl ScopeResolver {
    pub fn new(directory: Arc<dyn OrgDirectory>) -> Self {
        Self { directory }
    }

    /// Busca al principal en el directorio y lo resuelve.
    pub fn resolve_id(&self, principal_id: &str) -> Result<ScopeFilter, ScopeError> {
        let principal = self
            .directory
            .principal(principal_id)
            .map_err(|e| ScopeError::Directory(e.to_string()))?
            .ok_or_else(|| ScopeError::UnknownPrincipal(principal_id.to_string()))?;
        self.resolve(&principal)
    }

    #[instrument(skip(self, principal), fields(principal = %principal.id, level = %principal.level))]
    pub fn resolve(&self, principal: &Principal) -> Result<ScopeFilter, ScopeError> {
        principal.validate()?;

        let level = principal.level;
        let rows = match level.required_binding() {
            None => RowScope::All,
            Some(kind) => {
                let bindings = self.effective_bindings(principal, kind)?;
                self.row_scope(principal, kind, &bindings)?
            }
        };

        let filter = ScopeFilter {
            principal_id: principal.id.clone(),
            level,
            rows,
            columns: if level == AccessLevel::Contador { ColumnMask::FinancialOnly } else { ColumnMask::Full },
            read_only: level == AccessLevel::Auditor,
        };
        debug!(scope = %filter.describe(), "scope resolved");
        Ok(filter)
    }

    /// Principales de `audience` (todos si está vacío) cuyo alcance cubre cada
    /// registro de origen. Sin origen sólo califican alcances sin filtro de filas.
    pub fn eligible_recipients(
        &self,
        audience: &[AccessLevel],
        origin: &BTreeSet<OrgFacts>,
    ) -> Result<Vec<EligibleRecipient>, ScopeError> {
        let principals = self
            .directory
            .principals()
            .map_err(|e| ScopeError::Directory(e.to_string()))?;

        let mut out = Vec::new();
        for principal in principals {
            if !audience.is_empty() && !audience.contains(&principal.level) {
                continue;
            }
            let filter = match self.resolve(&principal) {
                Ok(f) => f,
                Err(e) => {
                    warn!(principal = %principal.id, error = %e, "skipping recipient with unresolvable scope");
                    continue;
                }
            };
            let covers = if origin.is_empty() {
                filter.rows.is_unrestricted()
            } else {
                origin.iter().all(|facts| filter.matches_facts(facts))
            };
            if covers {
                out.push(EligibleRecipient { principal, filter });
            }
        }
        Ok(out)
    }

    fn effective_bindings(&self, principal: &Principal, kind: BindingKind) -> Result<ScopeBindings, ScopeError> {
        if principal.bindings.has(kind) {
            return Ok(principal.bindings.clone());
        }
        let hierarchy = self
            .directory
            .get_hierarchy(&principal.id)
            .map_err(|e| ScopeError::Directory(e.to_string()))?
            .unwrap_or_default();
        let filled = fill_from_hierarchy(kind, &hierarchy);
        if !filled.has(kind) {
            return Err(ScopeError::MissingBinding {
                principal: principal.id.clone(),
                level: principal.level,
                required: kind,
            });
        }
        debug!(principal = %principal.id, binding = %kind, "binding taken from org directory");
        Ok(filled)
    }

    fn row_scope(&self, principal: &Principal, kind: BindingKind, b: &ScopeBindings) -> Result<RowScope, ScopeError> {
        let missing = || ScopeError::MissingBinding {
            principal: principal.id.clone(),
            level: principal.level,
            required: kind,
        };
        let rows = match kind {
            BindingKind::Branch => RowScope::Branch { branch_id: b.branch_id.ok_or_else(missing)? },
            BindingKind::Region => RowScope::Region { region_id: b.region_id.ok_or_else(missing)? },
            BindingKind::Employee => RowScope::Employee { employee_id: b.employee_id.ok_or_else(missing)? },
            BindingKind::Partner => RowScope::Partner { partner_id: b.partner_id.ok_or_else(missing)? },
            BindingKind::Customer => RowScope::Customer { customer_id: b.customer_id.ok_or_else(missing)? },
            BindingKind::Team => {
                let team_id = b.team_id.ok_or_else(missing)?;
                let members = self
                    .directory
                    .direct_reports(team_id)
                    .map_err(|e| ScopeError::Directory(e.to_string()))?;
                RowScope::Team { team_id, members }
            }
            // Ningún nivel exige vínculo de empresa.
            BindingKind::Company => return Err(missing()),
        };
        Ok(rows)
    }
}

/// Toma del organigrama sólo el vínculo del tipo requerido.
fn fill_from_hierarchy(kind: BindingKind, h: &Hierarchy) -> ScopeBindings {
    let mut b = ScopeBindings::default();
    match kind {
        BindingKind::Employee => b.employee_id = h.employee_id,
        BindingKind::Team => b.team_id = h.team_id,
        BindingKind::Branch => b.branch_id = h.branch_id,
        BindingKind::Region => b.region_id = h.region_id,
        BindingKind::Company => b.company_id = h.company_id,
        BindingKind::Partner => b.partner_id = h.partner_id,
        BindingKind::Customer => b.customer_id = h.customer_id,
    }
    b
}
