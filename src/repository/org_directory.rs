// src/repository/org_directory.rs
//! Directorio organizacional (organigrama) consultado de forma síncrona por el
//! resolvedor de alcance.

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

use crate::domain::error::ScopeError;
use crate::domain::model::ids::{
    BranchId, CompanyId, CustomerId, EmployeeId, PartnerId, RegionId, TeamId,
};
use crate::domain::model::principal::Principal;

/// Posición de un usuario en el organigrama.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Hierarchy {
    pub employee_id: Option<EmployeeId>,
    pub team_id: Option<TeamId>,
    pub branch_id: Option<BranchId>,
    pub region_id: Option<RegionId>,
    pub company_id: Option<CompanyId>,
    pub partner_id: Option<PartnerId>,
    pub customer_id: Option<CustomerId>,
}

pub trait OrgDirectory: Send + Sync + 'static {
    fn get_hierarchy(&self, principal_id: &str) -> anyhow::Result<Option<Hierarchy>>;

    /// Reportes directos de un equipo.
    fn direct_reports(&self, team: TeamId) -> anyhow::Result<BTreeSet<EmployeeId>>;

    fn principal(&self, principal_id: &str) -> anyhow::Result<Option<Principal>>;

    /// Todos los usuarios conocidos (candidatos a destinatarios de alertas).
    fn principals(&self) -> anyhow::Result<Vec<Principal>>;
}

/// Contenido de un archivo de organigrama (YAML).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DirectorySeed {
    pub principals: Vec<Principal>,
    pub hierarchies: BTreeMap<String, Hierarchy>,
    /// equipo -> empleados
    pub teams: BTreeMap<u64, Vec<u64>>,
}

#[derive(Default)]
struct Inner {
    principals: BTreeMap<String, Principal>,
    hierarchies: HashMap<String, Hierarchy>,
    teams: HashMap<TeamId, BTreeSet<EmployeeId>>,
}

#[derive(Default)]
pub struct InMemoryOrgDirectory {
    inner: RwLock<Inner>,
}

impl InMemoryOrgDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_principal(&self, principal: Principal) -> Result<(), ScopeError> {
        principal.validate()?;
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ScopeError::Directory("org directory lock poisoned".into()))?;
        inner.principals.insert(principal.id.clone(), principal);
        Ok(())
    }

    pub fn set_hierarchy(&self, principal_id: &str, hierarchy: Hierarchy) -> anyhow::Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("org directory lock poisoned"))?;
        inner.hierarchies.insert(principal_id.to_string(), hierarchy);
        Ok(())
    }

    /// Carga un organigrama completo; un principal inconsistente aborta la carga.
    pub fn from_seed(seed: DirectorySeed) -> anyhow::Result<Self> {
        let dir = Self::new();
        for principal in seed.principals {
            dir.upsert_principal(principal)?;
        }
        for (id, hierarchy) in seed.hierarchies {
            dir.set_hierarchy(&id, hierarchy)?;
        }
        for (team, members) in seed.teams {
            dir.set_team_members(TeamId(team), members.into_iter().map(EmployeeId))?;
        }
        Ok(dir)
    }

    pub fn load_yaml(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading org directory {}", path.display()))?;
        let seed: DirectorySeed = serde_yaml::from_str(&raw).context("parsing org directory")?;
        let dir = Self::from_seed(seed)?;
        info!(path = %path.display(), principals = dir.principals()?.len(), "org directory loaded");
        Ok(dir)
    }

    pub fn set_team_members(&self, team: TeamId, members: impl IntoIterator<Item = EmployeeId>) -> anyhow::Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("org directory lock poisoned"))?;
        inner.teams.insert(team, members.into_iter().collect());
        Ok(())
    }
}

impl OrgDirectory for InMemoryOrgDirectory {
    fn get_hierarchy(&self, principal_id: &str) -> anyhow::Result<Option<Hierarchy>> {
        let inner = self.inner.read().map_err(|_| anyhow!("org directory lock poisoned"))?;
        Ok(inner.hierarchies.get(principal_id).cloned())
    }

    fn direct_reports(&self, team: TeamId) -> anyhow::Result<BTreeSet<EmployeeId>> {
        let inner = self.inner.read().map_err(|_| anyhow!("org directory lock poisoned"))?;
        Ok(inner.teams.get(&team).cloned().unwrap_or_default())
    }

    fn principal(&self, principal_id: &str) -> anyhow::Result<Option<Principal>> {
        let inner = self.inner.read().map_err(|_| anyhow!("org directory lock poisoned"))?;
        Ok(inner.principals.get(principal_id).cloned())
    }

    fn principals(&self) -> anyhow::Result<Vec<Principal>> {
        let inner = self.inner.read().map_err(|_| anyhow!("org directory lock poisoned"))?;
        Ok(inner.principals.values().cloned().collect())
    }
}
