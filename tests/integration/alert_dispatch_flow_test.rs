// tests/integration/alert_dispatch_flow_test.rs
//! Flujo completo de una alerta: disparo, supresión, entrega multicanal con
//! reintentos y cierre.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use spirit_reporting_engine::adapter::notifier::in_app_notifier::InAppNotifier;
use spirit_reporting_engine::adapter::notifier::notifier_registry::{AdapterRegistry, ChannelAdapter, DeliveryOutcome};
use spirit_reporting_engine::app_state::AppState;
use spirit_reporting_engine::config::app_config::AppConfig;
use spirit_reporting_engine::domain::model::access_level::AccessLevel;
use spirit_reporting_engine::domain::model::alert::{AlertEvent, AlertState, AlertTrigger, TriggerSource};
use spirit_reporting_engine::domain::model::booking::{BookingRecord, CommissionBreakdown, ProductType};
use spirit_reporting_engine::domain::model::channel::ChannelId;
use spirit_reporting_engine::domain::model::delivery_status::{DeliveryState, RecipientRef, RecipientState};
use spirit_reporting_engine::domain::model::ids::{BranchId, CompanyId, EmployeeId, RegionId};
use spirit_reporting_engine::domain::model::principal::{Principal, ScopeBindings};
use spirit_reporting_engine::domain::model::scope_filter::OrgFacts;
use spirit_reporting_engine::domain::model::severity::Severity;
use spirit_reporting_engine::repository::alert_store::InMemoryAlertStore;
use spirit_reporting_engine::repository::org_directory::{InMemoryOrgDirectory, OrgDirectory};
use spirit_reporting_engine::repository::retry_queue::InMemoryRetryQueue;
use spirit_reporting_engine::repository::rule_store::RuleFormat;
use spirit_reporting_engine::service::event_deduplicator::{EventDeduplicator, InMemorySuppressionBackend};
use spirit_reporting_engine::service::notification_dispatcher::{FireOutcome, NotificationDispatcher};
use spirit_reporting_engine::service::scope_resolver::ScopeResolver;

/// Adaptador de prueba con respuesta fija que cuenta los envíos.
struct ScriptedAdapter {
    channel: ChannelId,
    outcome: DeliveryOutcome,
    sends: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(channel: ChannelId, outcome: DeliveryOutcome) -> Arc<Self> {
        Arc::new(Self { channel, outcome, sends: AtomicUsize::new(0) })
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedAdapter {
    fn channel(&self) -> ChannelId {
        self.channel
    }

    fn version(&self) -> &'static str {
        "test-1"
    }

    async fn send(&self, _event: &AlertEvent, _channel: ChannelId, _recipient: &RecipientRef) -> DeliveryOutcome {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

fn branch_facts(branch: u64) -> OrgFacts {
    OrgFacts {
        employee_id: EmployeeId(42),
        branch_id: BranchId(branch),
        region_id: RegionId(2),
        company_id: CompanyId(1),
        partner_id: None,
        customer_id: None,
    }
}

fn directory() -> Arc<InMemoryOrgDirectory> {
    let dir = InMemoryOrgDirectory::new();
    let director = Principal::new("dir-suc-7", AccessLevel::DirectorSucursal, ScopeBindings::branch(7))
        .unwrap()
        .with_contact(ChannelId::Email, "sucursal7@spirittours.test")
        .with_contact(ChannelId::Sms, "+34600000007")
        .with_contact(ChannelId::Slack, "https://hooks.slack.test/T000/B007");
    dir.upsert_principal(director).unwrap();
    dir.upsert_principal(
        Principal::new("dir-suc-8", AccessLevel::DirectorSucursal, ScopeBindings::branch(8))
            .unwrap()
            .with_contact(ChannelId::Email, "sucursal8@spirittours.test"),
    )
    .unwrap();
    dir.upsert_principal(Principal::new("admin", AccessLevel::Admin, ScopeBindings::default()).unwrap())
        .unwrap();
    Arc::new(dir)
}

fn critical_branch_trigger(branch: u64) -> AlertTrigger {
    AlertTrigger {
        rule_id: "caida-ventas-sucursal".into(),
        rule_version: 1,
        severity: Severity::Critical,
        source: TriggerSource::Threshold,
        channels: vec![ChannelId::Slack, ChannelId::Sms, ChannelId::Email],
        audience: vec![AccessLevel::DirectorSucursal],
        metric: "ventas_netas".into(),
        period: "2024-03-05..=2024-03-05".into(),
        scope_key: format!("branch:{branch}"),
        message: "ventas netas bajo umbral".into(),
        observed: Some(120.0),
        origin: [branch_facts(branch)].into_iter().collect::<BTreeSet<_>>(),
    }
}

async fn dispatcher(adapters: &[Arc<ScriptedAdapter>]) -> Result<NotificationDispatcher> {
    build_dispatcher(adapters, AppConfig::default(), directory()).await
}

async fn build_dispatcher(
    adapters: &[Arc<ScriptedAdapter>],
    config: AppConfig,
    directory: Arc<dyn OrgDirectory>,
) -> Result<NotificationDispatcher> {
    let registry = Arc::new(AdapterRegistry::new());
    for a in adapters {
        registry.register_adapter(a.clone()).await.map_err(anyhow::Error::msg)?;
    }
    Ok(NotificationDispatcher::new(
        &config,
        Arc::new(InMemoryAlertStore::new()),
        Arc::new(InMemoryRetryQueue::new()),
        Arc::new(EventDeduplicator::new(
            Arc::new(InMemorySuppressionBackend::new()),
            config.dispatcher.suppression_window(),
        )),
        ScopeResolver::new(directory),
        registry,
    ))
}

#[tokio::test]
async fn sms_exhausts_retries_and_alert_is_partially_delivered() -> Result<()> {
    let email = ScriptedAdapter::new(ChannelId::Email, DeliveryOutcome::Accepted);
    let slack = ScriptedAdapter::new(ChannelId::Slack, DeliveryOutcome::Accepted);
    let sms = ScriptedAdapter::new(ChannelId::Sms, DeliveryOutcome::Error("gateway 503".into()));
    let d = dispatcher(&[email.clone(), slack.clone(), sms.clone()]).await?;

    let t0 = Utc::now();
    let out = d.fire_at(critical_branch_trigger(7), t0).await?;
    let FireOutcome::Created { alert_id, state, channels } = out else {
        panic!("expected a new alert, got {out:?}");
    };
    assert_eq!(state, AlertState::Dispatching);
    // Orden por prioridad de canal.
    assert_eq!(channels, vec![ChannelId::Email, ChannelId::Sms, ChannelId::Slack]);

    let first = d.process_ready_at(t0).await?;
    assert_eq!((first.sent, first.rescheduled), (3, 1));

    // Reintentos de SMS a +2s, +4s y +8s.
    for offset in [2, 6, 14] {
        let report = d.process_ready_at(t0 + ChronoDuration::seconds(offset)).await?;
        assert_eq!(report.sent, 1, "retry at +{offset}s");
    }
    assert_eq!(sms.sends(), 4);
    assert_eq!((email.sends(), slack.sends()), (1, 1));

    // Email y Slack se dan por entregados al vencer el plazo de confirmación.
    let alert = d.get_alert(alert_id).await?;
    assert_eq!(alert.state, AlertState::Dispatching);
    assert_eq!(d.sweep_at(t0 + ChronoDuration::seconds(31)).await?, 1);

    let alert = d.get_alert(alert_id).await?;
    assert_eq!(alert.state, AlertState::PartiallyDelivered);
    let sms_delivery = &alert.deliveries[&ChannelId::Sms];
    assert_eq!(sms_delivery.state, DeliveryState::Failed);
    assert_eq!(sms_delivery.attempts, 4);
    assert_eq!(sms_delivery.last_error.as_deref(), Some("gateway 503"));
    assert_eq!(alert.deliveries[&ChannelId::Email].state, DeliveryState::Delivered);
    assert_eq!(alert.deliveries[&ChannelId::Slack].state, DeliveryState::Delivered);
    assert!(alert.closed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn repeated_trigger_is_suppressed_within_window() -> Result<()> {
    let email = ScriptedAdapter::new(ChannelId::Email, DeliveryOutcome::Accepted);
    let d = dispatcher(&[email]).await?;
    let t0 = Utc::now();

    let first = d.fire_at(critical_branch_trigger(7), t0).await?;
    let again = d.fire_at(critical_branch_trigger(7), t0 + ChronoDuration::minutes(5)).await?;
    assert_eq!(again, FireOutcome::Suppressed { alert_id: first.alert_id() });
    assert_eq!(d.get_alert(first.alert_id()).await?.occurrences, 2);

    // Otro alcance no comparte ventana.
    let other = d.fire_at(critical_branch_trigger(8), t0 + ChronoDuration::minutes(5)).await?;
    assert!(matches!(other, FireOutcome::Created { .. }));

    // Pasada la ventana de 15 minutos se abre una alerta nueva.
    let later = d.fire_at(critical_branch_trigger(7), t0 + ChronoDuration::minutes(16)).await?;
    assert!(matches!(later, FireOutcome::Created { .. }));
    assert_ne!(later.alert_id(), first.alert_id());
    Ok(())
}

#[tokio::test]
async fn data_outside_every_audience_scope_fails_the_alert() -> Result<()> {
    let email = ScriptedAdapter::new(ChannelId::Email, DeliveryOutcome::Accepted);
    let d = dispatcher(&[email.clone()]).await?;

    // Sucursal 9: ningún director de sucursal la cubre.
    let out = d.fire_at(critical_branch_trigger(9), Utc::now()).await?;
    let FireOutcome::Created { alert_id, state, .. } = out else {
        panic!("expected a new alert, got {out:?}");
    };
    assert_eq!(state, AlertState::Failed);
    let alert = d.get_alert(alert_id).await?;
    assert_eq!(alert.terminal_reason.as_deref(), Some("no eligible recipients"));
    assert_eq!(email.sends(), 0);
    Ok(())
}

#[tokio::test]
async fn branch_director_only_hears_about_own_branch() -> Result<()> {
    let email = ScriptedAdapter::new(ChannelId::Email, DeliveryOutcome::Accepted);
    let d = dispatcher(&[email.clone()]).await?;
    let t0 = Utc::now();

    let out = d.fire_at(critical_branch_trigger(8), t0).await?;
    d.process_ready_at(t0).await?;
    let alert = d.get_alert(out.alert_id()).await?;
    let recipients: Vec<&str> = alert.deliveries[&ChannelId::Email]
        .recipients
        .iter()
        .map(|r| r.recipient.principal_id.as_str())
        .collect();
    assert_eq!(recipients, vec!["dir-suc-8"]);
    // Sin SMS ni Slack para el director de la sucursal 8.
    assert_eq!(alert.deliveries.len(), 1);
    assert_eq!(email.sends(), 1);
    Ok(())
}

fn booking(branch: u64, day: u32) -> BookingRecord {
    BookingRecord {
        id: Uuid::new_v4(),
        sold_at: Utc.with_ymd_and_hms(2024, 3, day, 11, 0, 0).unwrap(),
        currency: "EUR".into(),
        net_amount: Decimal::new(150, 0),
        gross_amount: Decimal::new(150, 0),
        commissions: CommissionBreakdown::default(),
        employee_id: EmployeeId(40 + branch),
        branch_id: BranchId(branch),
        region_id: RegionId(2),
        company_id: CompanyId(1),
        partner_id: None,
        customer_id: None,
        product_type: ProductType::Package,
        passengers: 2,
    }
}

const BUSY_BRANCH_RULE: &str = r#"
id: reservas-altas-sucursal
name: Pico de reservas por sucursal
metric: reservas
group_by: branch
window_days: 1
condition:
  kind: threshold
  op: gt
  value: "1"
severity: high
channels: [in_app]
audience: [DIRECTOR_SUCURSAL]
"#;

#[tokio::test]
async fn registered_rule_fires_into_branch_inbox() -> Result<()> {
    let state = AppState::build(AppConfig::default(), directory()).await?;
    state.register_rule.execute("admin", BUSY_BRANCH_RULE, RuleFormat::Yaml).await?;
    state
        .ingest
        .execute("admin", vec![booking(7, 5), booking(7, 5), booking(7, 5), booking(8, 5), booking(7, 4)])
        .await?;

    let as_of = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let now = Utc::now();
    let summary = state.evaluate_rules.execute_at(as_of, None, now).await?;
    assert_eq!(summary.rules_evaluated, 1);
    assert_eq!(summary.created.len(), 1);
    assert!(summary.dispatch_errors.is_empty());

    state.dispatcher.process_ready_at(now).await?;
    let inbox = state.inbox.inbox("dir-suc-7").await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].alert_id, summary.created[0]);
    assert!(state.inbox.inbox("dir-suc-8").await.is_empty());
    assert!(state.inbox.inbox("admin").await.is_empty());

    // Segunda evaluación del mismo periodo: se pliega en la alerta abierta.
    let again = state.evaluate_rules.execute_at(as_of, None, now + ChronoDuration::minutes(1)).await?;
    assert!(again.created.is_empty());
    assert_eq!(again.suppressed, summary.created);
    Ok(())
}

/// Administradores con email más el director de la sucursal 7.
fn quota_directory(admins: &[&str]) -> Arc<InMemoryOrgDirectory> {
    let dir = InMemoryOrgDirectory::new();
    for id in admins {
        dir.upsert_principal(
            Principal::new(*id, AccessLevel::Admin, ScopeBindings::default())
                .unwrap()
                .with_contact(ChannelId::Email, format!("{id}@spirittours.test")),
        )
        .unwrap();
    }
    dir.upsert_principal(
        Principal::new("dir-suc-7", AccessLevel::DirectorSucursal, ScopeBindings::branch(7))
            .unwrap()
            .with_contact(ChannelId::Email, "sucursal7@spirittours.test"),
    )
    .unwrap();
    Arc::new(dir)
}

fn email_quota(max_per_minute: u32) -> AppConfig {
    let mut config = AppConfig::default();
    let mut email = config.channel(ChannelId::Email);
    email.max_per_minute = max_per_minute;
    config.channels.insert(ChannelId::Email, email);
    config
}

fn email_trigger(rule_id: &str, severity: Severity, audience: AccessLevel, origin: BTreeSet<OrgFacts>) -> AlertTrigger {
    AlertTrigger {
        rule_id: rule_id.into(),
        rule_version: 1,
        severity,
        source: TriggerSource::Threshold,
        channels: vec![ChannelId::Email],
        audience: vec![audience],
        metric: "reservas".into(),
        period: "2024-03-05..=2024-03-05".into(),
        scope_key: "total".into(),
        message: format!("{rule_id} disparada"),
        observed: Some(3.0),
        origin,
    }
}

fn accepted_on_email(alert: &AlertEvent) -> usize {
    alert.deliveries[&ChannelId::Email]
        .recipients
        .iter()
        .filter(|r| r.state != RecipientState::Pending)
        .count()
}

#[tokio::test]
async fn audience_larger_than_quota_is_served_across_windows() -> Result<()> {
    let email = ScriptedAdapter::new(ChannelId::Email, DeliveryOutcome::Accepted);
    let d = build_dispatcher(&[email.clone()], email_quota(2), quota_directory(&["admin-a", "admin-b", "admin-c"])).await?;
    let t0 = Utc::now();
    let out = d
        .fire_at(email_trigger("pico-global", Severity::Critical, AccessLevel::Admin, BTreeSet::new()), t0)
        .await?;

    // Primera ventana: caben dos de tres.
    let first = d.process_ready_at(t0).await?;
    assert_eq!((first.sent, first.rescheduled, first.rate_limited), (1, 1, 0));
    assert_eq!(email.sends(), 2);
    let alert = d.get_alert(out.alert_id()).await?;
    let delivery = &alert.deliveries[&ChannelId::Email];
    assert_eq!(delivery.state, DeliveryState::Retrying);
    assert_eq!(delivery.attempts, 1);
    assert!(delivery.history.iter().all(|h| h.errored == 0));

    // El scheduler sigue pasando cada minuto; el tercero sale al reabrirse la ventana.
    for minute in 1..20 {
        d.process_ready_at(t0 + ChronoDuration::minutes(minute)).await?;
    }
    assert_eq!(email.sends(), 3);

    d.sweep_at(t0 + ChronoDuration::minutes(20)).await?;
    let alert = d.get_alert(out.alert_id()).await?;
    assert_eq!(alert.state, AlertState::Delivered);
    assert!(alert.deliveries[&ChannelId::Email]
        .recipients
        .iter()
        .all(|r| r.state == RecipientState::Delivered && r.attempts == 1));
    Ok(())
}

#[tokio::test]
async fn critical_alert_takes_the_remaining_quota_first() -> Result<()> {
    let email = ScriptedAdapter::new(ChannelId::Email, DeliveryOutcome::Accepted);
    let d = build_dispatcher(&[email.clone()], email_quota(3), quota_directory(&["admin-a", "admin-b"])).await?;
    let t0 = Utc::now();

    // Dos de los tres envíos del minuto ya se usaron.
    d.fire_at(email_trigger("resumen", Severity::Medium, AccessLevel::Admin, BTreeSet::new()), t0).await?;
    d.process_ready_at(t0).await?;
    assert_eq!(email.sends(), 2);

    let t1 = t0 + ChronoDuration::seconds(1);
    let low = d
        .fire_at(
            email_trigger("sucursal-lenta", Severity::Low, AccessLevel::DirectorSucursal, [branch_facts(7)].into_iter().collect()),
            t1,
        )
        .await?;
    let critical = d
        .fire_at(email_trigger("caida-global", Severity::Critical, AccessLevel::Admin, BTreeSet::new()), t1)
        .await?;

    let report = d.process_ready_at(t1).await?;
    assert_eq!(report.claimed, 2);
    assert_eq!(report.rate_limited, 1);
    assert_eq!(email.sends(), 3);
    assert_eq!(accepted_on_email(&d.get_alert(critical.alert_id()).await?), 1);
    assert_eq!(accepted_on_email(&d.get_alert(low.alert_id()).await?), 0);

    // Siguiente ventana: el crítico completa y el bajo entra después.
    d.process_ready_at(t0 + ChronoDuration::minutes(1)).await?;
    assert_eq!(email.sends(), 5);
    assert_eq!(accepted_on_email(&d.get_alert(critical.alert_id()).await?), 2);
    assert_eq!(accepted_on_email(&d.get_alert(low.alert_id()).await?), 1);
    Ok(())
}
