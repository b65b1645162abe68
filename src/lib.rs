//! Motor de reportes, pronóstico y alertas con alcance por permisos.
//!
//! Capas:
//! - `domain`: modelos y errores.
//! - `repository`: almacenes (reservas, organigrama, caché, alertas, cola, reglas).
//! - `service`: resolvedor de alcance, agregador, motor de pronóstico, despachador.
//! - `usecase`: operaciones expuestas a HTTP y a los workers.
//! - `adapter`: canales de notificación y API HTTP.
//! - `scheduler`: bucles de reintento y purga.

pub mod app_state;

pub mod config {
    pub mod app_config;
    pub mod channel_config;
}

pub mod domain {
    pub mod error;
    pub mod model {
        pub mod access_level;
        pub mod alert;
        pub mod booking;
        pub mod channel;
        pub mod currency;
        pub mod delivery_status;
        pub mod forecast;
        pub mod ids;
        pub mod metric;
        pub mod principal;
        pub mod scope_filter;
        pub mod severity;
    }
}

pub mod repository {
    pub mod alert_store;
    pub mod booking_store;
    pub mod metric_cache;
    pub mod org_directory;
    pub mod retry_queue;
    pub mod rule_store;
}

pub mod service {
    pub mod event_deduplicator;
    pub mod forecast;
    pub mod forecast_engine;
    pub mod metrics_aggregator;
    pub mod notification_dispatcher;
    pub mod rate_limiter;
    pub mod rule_evaluator;
    pub mod scope_resolver;
}

pub mod usecase {
    pub mod evaluate_alert_rules;
    pub mod forecast_metric;
    pub mod generate_report;
    pub mod ingest_booking;
    pub mod register_alert_rule;
    pub mod track_alert;
}

pub mod adapter {
    pub mod http {
        pub mod controller;
        pub mod middleware;
        pub mod routes;
    }
    pub mod notifier {
        pub mod in_app_notifier;
        pub mod notifier_registry;
        pub mod webhook_notifier;
    }
}

pub mod scheduler {
    pub mod purge_scheduler;
    pub mod retry_scheduler;
}

pub mod telemetry {
    pub mod metrics;
    pub mod tracing;
}
