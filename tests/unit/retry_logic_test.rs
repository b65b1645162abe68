// tests/unit/retry_logic_test.rs

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use uuid::Uuid;

use spirit_reporting_engine::config::app_config::AppConfig;
use spirit_reporting_engine::domain::model::channel::ChannelId;
use spirit_reporting_engine::domain::model::delivery_status::{
    DeliveryAttempt, DeliveryState, RecipientOutcome, RecipientRef,
};
use spirit_reporting_engine::domain::model::severity::Severity;
use spirit_reporting_engine::repository::retry_queue::{InMemoryRetryQueue, QueueEntry, RetryQueue};

fn recipient(id: &str) -> RecipientRef {
    RecipientRef { principal_id: id.into(), address: format!("+34600{id}") }
}

#[test]
fn default_channel_policies() {
    let cfg = AppConfig::default();
    let expected = [
        (ChannelId::Email, 5, 2_000, 600),
        (ChannelId::Sms, 4, 2_000, 300),
        (ChannelId::WhatsApp, 4, 2_000, 300),
        (ChannelId::Slack, 5, 1_000, 300),
        (ChannelId::Push, 3, 1_000, 120),
        (ChannelId::Webhook, 6, 1_000, 600),
        (ChannelId::InApp, 3, 500, 60),
    ];
    for (channel, attempts, initial_ms, total_secs) in expected {
        let p = cfg.channel(channel).retry_policy();
        assert_eq!(p.max_attempts, attempts, "{channel}");
        assert_eq!(p.initial_backoff, Duration::from_millis(initial_ms), "{channel}");
        assert_eq!(p.max_total_wait, Duration::from_secs(total_secs), "{channel}");
        assert_eq!(p.multiplier, 2.0);
        assert_eq!(p.max_backoff, Duration::from_secs(60));
    }
}

#[test]
fn sms_retries_follow_backoff_then_fail_permanently() {
    let policy = AppConfig::default().channel(ChannelId::Sms).retry_policy();
    let mut d = DeliveryAttempt::new(Uuid::new_v4(), ChannelId::Sms, policy, vec![recipient("1")]);
    let start = Utc::now();
    let mut now = start;
    let mut waits = Vec::new();

    loop {
        d.record_attempt(
            vec![(recipient("1"), RecipientOutcome::Error("gateway 503".into()))],
            Some(Duration::from_millis(40)),
            Duration::from_secs(30),
            now,
        );
        match d.next_retry_at {
            Some(at) => {
                waits.push((at - now).num_seconds());
                now = at;
            }
            None => break,
        }
    }

    // 4 intentos: esperas de 2s, 4s y 8s entre ellos.
    assert_eq!(waits, vec![2, 4, 8]);
    assert_eq!(d.attempts, 4);
    assert_eq!(d.state, DeliveryState::Failed);
    assert_eq!(d.last_error.as_deref(), Some("gateway 503"));
    assert!(d.state.is_final());
}

#[test]
fn partial_success_only_retries_pending_recipients() {
    let policy = AppConfig::default().channel(ChannelId::Email).retry_policy();
    let mut d = DeliveryAttempt::new(
        Uuid::new_v4(),
        ChannelId::Email,
        policy,
        vec![recipient("a"), recipient("b")],
    );
    let now = Utc::now();
    d.record_attempt(
        vec![
            (recipient("a"), RecipientOutcome::Accepted { confirms: false }),
            (recipient("b"), RecipientOutcome::Error("timeout".into())),
        ],
        None,
        Duration::from_secs(30),
        now,
    );
    assert_eq!(d.state, DeliveryState::Retrying);
    assert_eq!(d.pending_recipients(), vec![recipient("b")]);

    d.record_attempt(
        vec![(recipient("b"), RecipientOutcome::Accepted { confirms: false })],
        None,
        Duration::from_secs(30),
        now + ChronoDuration::seconds(2),
    );
    assert_eq!(d.state, DeliveryState::Accepted);
    assert!(d.apply_assumed_deliveries(now + ChronoDuration::seconds(40)));
    assert_eq!(d.state, DeliveryState::Delivered);
}

#[tokio::test]
async fn queue_serves_severity_then_channel_priority() -> Result<()> {
    let q = InMemoryRetryQueue::new();
    let now = Utc::now();
    let alert = Uuid::new_v4();
    let entry = |alert_id, channel, severity, priority| QueueEntry {
        alert_id,
        channel,
        severity,
        channel_priority: priority,
        next_attempt_at: now,
        enqueued_at: now,
    };

    q.enqueue(entry(Uuid::new_v4(), ChannelId::Email, Severity::Info, 1)).await?;
    q.enqueue(entry(alert, ChannelId::Slack, Severity::Critical, 4)).await?;
    q.enqueue(entry(alert, ChannelId::Email, Severity::Critical, 1)).await?;
    q.enqueue(entry(alert, ChannelId::Sms, Severity::Critical, 2)).await?;

    let claimed = q.claim_ready(now, 10).await?;
    let order: Vec<(Severity, ChannelId)> = claimed.iter().map(|e| (e.severity, e.channel)).collect();
    assert_eq!(
        order,
        vec![
            (Severity::Critical, ChannelId::Email),
            (Severity::Critical, ChannelId::Sms),
            (Severity::Critical, ChannelId::Slack),
            (Severity::Info, ChannelId::Email),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn future_entries_are_not_claimed() -> Result<()> {
    let q = InMemoryRetryQueue::new();
    let now = Utc::now();
    q.enqueue(QueueEntry {
        alert_id: Uuid::new_v4(),
        channel: ChannelId::Webhook,
        severity: Severity::High,
        channel_priority: 6,
        next_attempt_at: now + ChronoDuration::seconds(5),
        enqueued_at: now,
    })
    .await?;

    assert!(q.claim_ready(now, 10).await?.is_empty());
    let stats = q.stats(now).await?;
    assert_eq!((stats.queued, stats.ready), (1, 0));
    assert_eq!(q.claim_ready(now + ChronoDuration::seconds(5), 10).await?.len(), 1);
    Ok(())
}
