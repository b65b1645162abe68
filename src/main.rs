// src/main.rs
//! Punto de entrada de `spirit-reporting-engine`.
//!
//! - Cargar configuración en capas, tracing y métricas.
//! - Construir el estado compartido y el organigrama inicial.
//! - Arrancar el servidor HTTP (Axum), los schedulers de reintento y purga y la
//!   evaluación periódica de reglas.
//! - Gestionar apagado ordenado (graceful shutdown).

use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{select, signal, sync::broadcast, task::JoinSet};
use tracing::{error, info, warn};

use spirit_reporting_engine::adapter::http::routes::build_router;
use spirit_reporting_engine::app_state::AppState;
use spirit_reporting_engine::config::app_config::SharedAppConfig;
use spirit_reporting_engine::repository::org_directory::InMemoryOrgDirectory;
use spirit_reporting_engine::scheduler::purge_scheduler::PurgeScheduler;
use spirit_reporting_engine::scheduler::retry_scheduler::{RetryScheduler, RetrySchedulerConfig};
use spirit_reporting_engine::telemetry;

/// Señales de shutdown compartidas entre tareas.
#[derive(Clone)]
struct Shutdown {
    tx: broadcast::Sender<()>,
}
impl Shutdown {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(8);
        Self { tx }
    }
    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
    fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

/// Punto de entrada Tokio.
#[tokio::main]
async fn main() {
    // 1) Carga de configuración
    let profile = std::env::var("APP_PROFILE").unwrap_or_else(|_| "development".into());
    let shared = match SharedAppConfig::load_from_sources(&SharedAppConfig::default_paths(&profile)).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ No se pudo cargar la configuración: {e:#}");
            std::process::exit(1);
        }
    };
    let cfg = shared.get_config().await;

    // 2) Tracing + métricas
    if let Err(e) = telemetry::tracing::init_tracing(&cfg.logging) {
        eprintln!("⚠️  Tracing parcial: {e}");
    }
    telemetry::metrics::register_core_metrics();

    // 3) Organigrama y estado compartido
    let seed = Path::new(&cfg.directory.seed_file);
    let directory = if seed.exists() {
        match InMemoryOrgDirectory::load_yaml(seed) {
            Ok(d) => d,
            Err(e) => {
                error!(error = %format!("{e:#}"), "org directory could not be loaded");
                std::process::exit(1);
            }
        }
    } else {
        warn!(path = %seed.display(), "org directory seed not found; starting empty");
        InMemoryOrgDirectory::new()
    };

    let state = match AppState::build(cfg.clone(), Arc::new(directory)).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %format!("{e:#}"), "application state could not be built");
            std::process::exit(1);
        }
    };

    // 4) Disparadores de apagado
    let shutdown = Shutdown::new();

    // 5) Conjunto de tareas concurrentes
    let mut tasks = JoinSet::new();

    // 5.a) Servidor HTTP (REST)
    let http_addr: SocketAddr = match cfg.http.bind_addr.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(bind = %cfg.http.bind_addr, error = %e, "invalid http.bind_addr");
            std::process::exit(1);
        }
    };
    {
        let app = build_router(state.clone());
        let mut http_shutdown_rx = shutdown.subscribe();
        tasks.spawn(async move {
            let listener = match tokio::net::TcpListener::bind(http_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(%http_addr, error = %e, "HTTP bind failed");
                    return;
                }
            };
            info!(%http_addr, "🌐 HTTP server escuchando");
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.recv().await;
                info!("🔻 Recibida señal de shutdown para HTTP");
            });
            if let Err(e) = server.await {
                error!(error = ?e, "HTTP server finalizó con error");
            }
        });
    }

    // 5.b) Schedulers (retry/purge)
    let retry_handle = Arc::new(RetryScheduler::new(
        state.dispatcher.clone(),
        RetrySchedulerConfig {
            poll_interval: Duration::from_millis(cfg.scheduler.retry_poll_interval_ms),
            ..Default::default()
        },
    ))
    .start();
    let purge_handle = Arc::new(PurgeScheduler::new(
        state.alerts.clone(),
        state.cache.clone(),
        state.deduplicator.clone(),
        Duration::from_secs(cfg.scheduler.alert_retention_secs),
        Duration::from_secs(cfg.scheduler.purge_interval_secs),
    ))
    .start();

    // 5.c) Evaluación periódica de reglas
    if cfg.scheduler.rule_eval_interval_secs > 0 {
        let evaluate = state.evaluate_rules.clone();
        let every = Duration::from_secs(cfg.scheduler.rule_eval_interval_secs);
        let mut eval_shutdown_rx = shutdown.subscribe();
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                select! {
                    _ = eval_shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = evaluate.execute(Utc::now().date_naive(), None).await {
                            warn!(error = %e, "scheduled rule evaluation failed");
                        }
                    }
                }
            }
            info!("🔻 Shutdown para evaluación de reglas");
        });
    }

    // 6) Señales del SO y espera activa
    info!("🚀 spirit-reporting-engine iniciando con perfil: {}", cfg.environment.profile);
    let graceful = async {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("🛑 Recibida señal de parada: iniciando graceful shutdown");
    };

    // Esperar señal y disparar shutdown
    graceful.await;
    shutdown.trigger();

    // Dar tiempo a que servidores y workers terminen (grace period)
    let grace = Duration::from_secs(10);
    let timed = tokio::time::timeout(grace, async {
        if let Err(e) = retry_handle.shutdown().await {
            warn!(error = %e, "retry scheduler did not stop cleanly");
        }
        if let Err(e) = purge_handle.shutdown().await {
            warn!(error = %e, "purge scheduler did not stop cleanly");
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = ?e, "Tarea terminó con panic/error durante shutdown");
            }
        }
    });
    match timed.await {
        Ok(_) => info!("🧯 Shutdown limpio completado."),
        Err(_) => warn!("⏲️  Timeout en shutdown; forzando salida."),
    }
    info!("👋 Servicio detenido.");
}
