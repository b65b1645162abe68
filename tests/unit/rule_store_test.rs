// tests/unit/rule_store_test.rs

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use spirit_reporting_engine::domain::model::channel::ChannelId;
use spirit_reporting_engine::domain::model::severity::Severity;
use spirit_reporting_engine::repository::rule_store::{
    AuditSink, InMemoryRuleStore, RuleCondition, RuleFormat, RuleStore, RuleVersion,
};

/// Sink que guarda las acciones auditadas.
#[derive(Default)]
struct RecordingAudit {
    entries: Mutex<Vec<(String, u32, String)>>,
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record_rule_change(&self, entry: &RuleVersion, action: &str) {
        self.entries
            .lock()
            .await
            .push((entry.rule_id.clone(), entry.version, action.to_string()));
    }
}

const BRANCH_SALES_JSON: &str = r#"{
    "id": "ventas-sucursal-bajas",
    "name": "Ventas netas bajas por sucursal",
    "priority": 10,
    "metric": "ventas_netas",
    "group_by": "branch",
    "window_days": 7,
    "condition": { "kind": "threshold", "op": "lt", "value": "1000" },
    "severity": "high",
    "channels": ["email", "slack"],
    "audience": ["DIRECTOR_SUCURSAL", "GERENTE_REGIONAL"]
}"#;

const PASSENGER_ANOMALY_YAML: &str = r#"
id: pasajeros-anomalos
name: Pasajeros fuera de patrón
metric: pasajeros
group_by: region
window_days: 3
condition:
  kind: anomaly
  model: seasonal_residual
  min_score: 0.9
  history_days: 56
severity: medium
channels: [in_app]
"#;

fn store() -> (InMemoryRuleStore, Arc<RecordingAudit>) {
    let audit = Arc::new(RecordingAudit::default());
    (InMemoryRuleStore::new(audit.clone()), audit)
}

#[tokio::test]
async fn create_and_list_active_rules_by_priority() -> Result<()> {
    let (store, audit) = store();
    store.create_rule("admin", PASSENGER_ANOMALY_YAML, RuleFormat::Yaml).await?;
    let v = store.create_rule("admin", BRANCH_SALES_JSON, RuleFormat::Json).await?;
    assert_eq!(v.version, 1);
    assert!(v.active);

    let active = store.get_active_rules().await?;
    let ids: Vec<&str> = active.iter().map(|r| r.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["ventas-sucursal-bajas", "pasajeros-anomalos"]);

    let anomaly = &active[1].definition;
    assert_eq!(anomaly.severity, Severity::Medium);
    assert_eq!(anomaly.channels, vec![ChannelId::InApp]);
    assert!(matches!(anomaly.condition, RuleCondition::Anomaly { history_days: 56, .. }));

    assert_eq!(audit.entries.lock().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn duplicate_create_is_rejected() -> Result<()> {
    let (store, _) = store();
    store.create_rule("admin", BRANCH_SALES_JSON, RuleFormat::Json).await?;
    assert!(store.create_rule("admin", BRANCH_SALES_JSON, RuleFormat::Json).await.is_err());
    Ok(())
}

#[tokio::test]
async fn update_rollback_and_deactivate_keep_history() -> Result<()> {
    let (store, audit) = store();
    store.create_rule("admin", BRANCH_SALES_JSON, RuleFormat::Json).await?;

    let updated = BRANCH_SALES_JSON.replace("\"1000\"", "\"2500\"");
    let v2 = store.update_rule("ventas-sucursal-bajas", "dir-general", &updated, RuleFormat::Json).await?;
    assert_eq!(v2.version, 2);
    assert_eq!(v2.created_by, "dir-general");

    let v3 = store.rollback_rule("ventas-sucursal-bajas", 1, "admin").await?;
    assert_eq!(v3.version, 3);
    assert_eq!(v3.definition.condition, store.get_rule_versions("ventas-sucursal-bajas").await?[0].definition.condition);

    store.deactivate_rule("ventas-sucursal-bajas", "admin").await?;
    assert!(store.get_active_rules().await?.is_empty());

    let versions = store.get_rule_versions("ventas-sucursal-bajas").await?;
    assert_eq!(versions.len(), 4);
    assert_eq!(versions.iter().filter(|v| v.active).count(), 0);

    let actions: Vec<String> = audit.entries.lock().await.iter().map(|(_, _, a)| a.clone()).collect();
    assert_eq!(actions, vec!["create", "update", "rollback", "deactivate"]);
    Ok(())
}

#[tokio::test]
async fn update_must_target_same_id() -> Result<()> {
    let (store, _) = store();
    store.create_rule("admin", BRANCH_SALES_JSON, RuleFormat::Json).await?;
    let err = store
        .update_rule("otra-regla", "admin", BRANCH_SALES_JSON, RuleFormat::Json)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not match"));
    Ok(())
}

#[tokio::test]
async fn invalid_definitions_are_rejected() {
    let (store, _) = store();

    let no_channels = BRANCH_SALES_JSON.replace("[\"email\", \"slack\"]", "[]");
    assert!(store.validate_raw_rule(&no_channels, RuleFormat::Json).await.is_err());

    let repeated = BRANCH_SALES_JSON.replace("[\"email\", \"slack\"]", "[\"email\", \"email\"]");
    assert!(store.validate_raw_rule(&repeated, RuleFormat::Json).await.is_err());

    let unknown_metric = BRANCH_SALES_JSON.replace("ventas_netas", "ventas_lunares");
    assert!(store.validate_raw_rule(&unknown_metric, RuleFormat::Json).await.is_err());

    let bad_score = PASSENGER_ANOMALY_YAML.replace("min_score: 0.9", "min_score: 1.5");
    assert!(store.validate_raw_rule(&bad_score, RuleFormat::Yaml).await.is_err());

    assert!(store.validate_raw_rule("{ not json", RuleFormat::Json).await.is_err());
}

#[test]
fn content_type_selects_format() {
    assert_eq!(RuleFormat::from_content_type("application/x-yaml"), RuleFormat::Yaml);
    assert_eq!(RuleFormat::from_content_type("text/yaml; charset=utf-8"), RuleFormat::Yaml);
    assert_eq!(RuleFormat::from_content_type("application/json"), RuleFormat::Json);
}
