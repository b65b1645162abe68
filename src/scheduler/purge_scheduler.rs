// src/scheduler/purge_scheduler.rs
//! Programador de purga.
//!
//! En cada ciclo elimina las alertas terminales más antiguas que la retención,
//! las entradas vencidas de la caché de métricas y las entradas de supresión
//! expiradas.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{error, info};

use crate::repository::alert_store::AlertStore;
use crate::repository::metric_cache::MetricCache;
use crate::service::event_deduplicator::EventDeduplicator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub alerts: usize,
    pub cache_entries: usize,
    pub suppression_entries: usize,
}

pub struct PurgeScheduler {
    alerts: Arc<dyn AlertStore>,
    cache: Arc<dyn MetricCache>,
    dedup: Arc<EventDeduplicator>,
    retention: Duration,
    every: TokioDuration,
}

pub struct PurgeSchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl PurgeSchedulerHandle {
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.join_handle.await.context("purge scheduler join failed")?;
        Ok(())
    }
}

impl PurgeScheduler {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        cache: Arc<dyn MetricCache>,
        dedup: Arc<EventDeduplicator>,
        retention: std::time::Duration,
        every: std::time::Duration,
    ) -> Self {
        Self {
            alerts,
            cache,
            dedup,
            retention: Duration::from_std(retention).unwrap_or_else(|_| Duration::days(7)),
            every,
        }
    }

    /// Inicia la tarea programada de purga
    pub fn start(self: Arc<Self>) -> PurgeSchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let scheduler = self.clone();
        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(scheduler.every);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.run_purge_cycle(Utc::now()).await {
                            error!(error = ?e, "purge cycle failed");
                        }
                    }
                }
            }
            info!("purge scheduler loop exiting");
        });
        PurgeSchedulerHandle { shutdown_tx, join_handle }
    }

    /// Ejecuta un ciclo de purga
    pub async fn run_purge_cycle(&self, now: DateTime<Utc>) -> anyhow::Result<PurgeReport> {
        let cutoff = now - self.retention;
        let report = PurgeReport {
            alerts: self.alerts.purge_closed_before(cutoff).await?,
            cache_entries: self.cache.purge_expired().await?,
            suppression_entries: self.dedup.purge_expired(now).await?,
        };
        if report != PurgeReport::default() {
            info!(
                alerts = report.alerts,
                cache_entries = report.cache_entries,
                suppression_entries = report.suppression_entries,
                cutoff = %cutoff,
                "purge cycle finished"
            );
        }
        Ok(report)
    }
}
