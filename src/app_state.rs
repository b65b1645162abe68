// src/app_state.rs
//! Estado compartido de la aplicación inyectado en HTTP y en los workers.
//!
//! Construye los almacenes en memoria, los servicios y los casos de uso a partir
//! de una `AppConfig` ya validada. El directorio organizacional se inyecta para
//! que los tests y `main` decidan de dónde sale.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::info;

use crate::adapter::notifier::in_app_notifier::InAppNotifier;
use crate::adapter::notifier::notifier_registry::AdapterRegistry;
use crate::adapter::notifier::webhook_notifier::WebhookNotifier;
use crate::config::app_config::AppConfig;
use crate::domain::model::channel::ChannelId;
use crate::repository::alert_store::{AlertStore, InMemoryAlertStore};
use crate::repository::booking_store::{BookingStore, InMemoryBookingStore};
use crate::repository::metric_cache::{CacheInvalidator, InMemoryMetricCache, MetricCache};
use crate::repository::org_directory::OrgDirectory;
use crate::repository::retry_queue::{InMemoryRetryQueue, RetryQueue};
use crate::repository::rule_store::{InMemoryRuleStore, RuleStore, TracingAudit};
use crate::service::event_deduplicator::{EventDeduplicator, InMemorySuppressionBackend};
use crate::service::forecast_engine::ForecastEngine;
use crate::service::metrics_aggregator::MetricsAggregator;
use crate::service::notification_dispatcher::NotificationDispatcher;
use crate::service::rule_evaluator::RuleEvaluator;
use crate::service::scope_resolver::ScopeResolver;
use crate::usecase::evaluate_alert_rules::EvaluateAlertRulesUseCase;
use crate::usecase::forecast_metric::ForecastMetricUseCase;
use crate::usecase::generate_report::GenerateReportUseCase;
use crate::usecase::ingest_booking::IngestBookingUseCase;
use crate::usecase::register_alert_rule::RegisterAlertRuleUseCase;
use crate::usecase::track_alert::TrackAlertUseCase;

/// Mensajes retenidos por bandeja in-app.
const INBOX_CAPACITY: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AppConfig>,
    pub bookings: Arc<dyn BookingStore>,
    pub cache: Arc<dyn MetricCache>,
    pub alerts: Arc<dyn AlertStore>,
    pub rules: Arc<dyn RuleStore>,
    pub inbox: Arc<InAppNotifier>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub deduplicator: Arc<EventDeduplicator>,
    pub ingest: Arc<IngestBookingUseCase>,
    pub reports: Arc<GenerateReportUseCase>,
    pub forecasts: Arc<ForecastMetricUseCase>,
    pub register_rule: Arc<RegisterAlertRuleUseCase>,
    pub evaluate_rules: Arc<EvaluateAlertRulesUseCase>,
    pub track_alert: Arc<TrackAlertUseCase>,
}

impl AppState {
    pub async fn build(cfg: AppConfig, directory: Arc<dyn OrgDirectory>) -> anyhow::Result<Self> {
        cfg.validate()?;
        let cfg = Arc::new(cfg);
        let resolver = ScopeResolver::new(directory);

        let bookings: Arc<dyn BookingStore> = Arc::new(InMemoryBookingStore::new());
        let cache: Arc<dyn MetricCache> = Arc::new(InMemoryMetricCache::new(cfg.reporting.cache_ttl()));
        let aggregator = Arc::new(MetricsAggregator::new(bookings.clone(), cache.clone(), &cfg.reporting));
        let engine = Arc::new(ForecastEngine::new(&cfg.forecast));

        let alerts: Arc<dyn AlertStore> = Arc::new(InMemoryAlertStore::new());
        let queue: Arc<dyn RetryQueue> = Arc::new(InMemoryRetryQueue::new());
        let deduplicator = Arc::new(EventDeduplicator::new(
            Arc::new(InMemorySuppressionBackend::new()),
            cfg.dispatcher.suppression_window(),
        ));

        let adapters = Arc::new(AdapterRegistry::new());
        let inbox = Arc::new(InAppNotifier::new(INBOX_CAPACITY));
        adapters.register_adapter(inbox.clone()).await.map_err(|e| anyhow!(e))?;
        for channel in [ChannelId::Webhook, ChannelId::Slack] {
            let channel_cfg = cfg.channel(channel);
            if !channel_cfg.enabled {
                continue;
            }
            let timeout = channel_cfg.latency_target().max(Duration::from_secs(1));
            let notifier = WebhookNotifier::new(channel, channel_cfg.endpoint.clone(), timeout)?;
            adapters.register_adapter(Arc::new(notifier)).await.map_err(|e| anyhow!(e))?;
        }

        let dispatcher = Arc::new(NotificationDispatcher::new(
            &cfg,
            alerts.clone(),
            queue,
            deduplicator.clone(),
            resolver.clone(),
            adapters.clone(),
        ));

        let rules: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new(Arc::new(TracingAudit)));
        let evaluator = Arc::new(RuleEvaluator::new(rules.clone(), aggregator.clone(), engine.clone()));

        let ingest = IngestBookingUseCase::new(bookings.clone(), resolver.clone())
            .with_listener(Arc::new(CacheInvalidator::new(cache.clone())));

        info!(
            profile = %cfg.environment.profile,
            adapters = ?adapters.channels().await,
            "application state ready"
        );

        Ok(Self {
            reports: Arc::new(GenerateReportUseCase::new(aggregator.clone(), resolver.clone())),
            forecasts: Arc::new(ForecastMetricUseCase::new(aggregator, engine, resolver.clone())),
            register_rule: Arc::new(RegisterAlertRuleUseCase::new(rules.clone(), resolver.clone())),
            evaluate_rules: Arc::new(EvaluateAlertRulesUseCase::new(evaluator, dispatcher.clone(), resolver.clone())),
            track_alert: Arc::new(TrackAlertUseCase::new(dispatcher.clone(), resolver)),
            ingest: Arc::new(ingest),
            cfg,
            bookings,
            cache,
            alerts,
            rules,
            inbox,
            dispatcher,
            deduplicator,
        })
    }
}
