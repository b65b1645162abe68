// src/usecase/register_alert_rule.rs
//! Alta y versionado de reglas de alerta (JSON o YAML).
//!
//! Si la regla ya existe se crea una nueva versión activa; las anteriores se
//! conservan para auditoría y rollback.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::domain::error::EngineError;
use crate::repository::rule_store::{RuleFormat, RuleStore, RuleVersion};
use crate::service::scope_resolver::ScopeResolver;

pub struct RegisterAlertRuleUseCase {
    rules: Arc<dyn RuleStore>,
    resolver: ScopeResolver,
}

impl RegisterAlertRuleUseCase {
    pub fn new(rules: Arc<dyn RuleStore>, resolver: ScopeResolver) -> Self {
        Self { rules, resolver }
    }

    #[instrument(skip(self, raw), fields(format = ?format))]
    pub async fn execute(&self, principal_id: &str, raw: &str, format: RuleFormat) -> Result<RuleVersion, EngineError> {
        self.resolver.resolve_id(principal_id)?.ensure_writable()?;

        // Errores de sintaxis o semántica son del cliente.
        let def = self
            .rules
            .validate_raw_rule(raw, format)
            .await
            .map_err(|e| EngineError::Validation(format!("{e:#}")))?;

        let existing = self.rules.get_rule_versions(&def.id).await?;
        let version = if existing.is_empty() {
            self.rules.create_rule(principal_id, raw, format).await?
        } else {
            self.rules.update_rule(&def.id, principal_id, raw, format).await?
        };
        info!(rule = %version.rule_id, version = version.version, by = %principal_id, "alert rule registered");
        Ok(version)
    }

    pub async fn deactivate(&self, principal_id: &str, rule_id: &str) -> Result<(), EngineError> {
        self.resolver.resolve_id(principal_id)?.ensure_writable()?;
        self.rules.deactivate_rule(rule_id, principal_id).await?;
        info!(rule = %rule_id, by = %principal_id, "alert rule deactivated");
        Ok(())
    }

    pub async fn rollback(&self, principal_id: &str, rule_id: &str, target_version: u32) -> Result<RuleVersion, EngineError> {
        self.resolver.resolve_id(principal_id)?.ensure_writable()?;
        Ok(self.rules.rollback_rule(rule_id, target_version, principal_id).await?)
    }

    pub async fn versions(&self, rule_id: &str) -> Result<Vec<RuleVersion>, EngineError> {
        Ok(self.rules.get_rule_versions(rule_id).await?)
    }
}
