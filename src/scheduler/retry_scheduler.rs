// src/scheduler/retry_scheduler.rs
//! Retry scheduler
//!
//! - Sondea periódicamente la cola de entregas y procesa las listas.
//! - Tras cada pasada cierra las alertas cuyo plazo venció o cuyas entregas se
//!   dan por hechas (`sweep`).
//! - Permite forzar una pasada (`trigger_manual`) y detenerse de forma ordenada.
//!
//! Uso:
//! - Construir con un `DeliveryExecutor` (el despachador) y arrancar con `start()`.
//! - `handle.shutdown().await` espera a que termine la pasada en curso.

use anyhow::Context;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::service::notification_dispatcher::{DispatchReport, NotificationDispatcher};

/// Una pasada del bucle de entregas.
#[async_trait]
pub trait DeliveryExecutor: Send + Sync + 'static {
    async fn run_cycle(&self) -> anyhow::Result<DispatchReport>;
}

#[async_trait]
impl DeliveryExecutor for NotificationDispatcher {
    async fn run_cycle(&self) -> anyhow::Result<DispatchReport> {
        let report = self.process_ready().await?;
        let expired = self.sweep().await?;
        Ok(DispatchReport { closed: report.closed + expired, ..report })
    }
}

#[derive(Clone)]
pub struct RetrySchedulerConfig {
    pub poll_interval: Duration,
    /// Capacidad del canal de disparos manuales.
    pub manual_trigger_buffer: usize,
}

impl Default for RetrySchedulerConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(250), manual_trigger_buffer: 8 }
    }
}

/// Handle returned by the scheduler when started; allows manual trigger and shutdown
pub struct RetrySchedulerHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl RetrySchedulerHandle {
    /// Pide una pasada inmediata (no bloquea).
    pub fn trigger_manual(&self) -> Result<(), String> {
        self.trigger_tx.try_send(()).map_err(|e| format!("failed to send manual trigger: {}", e))
    }

    /// Shutdown scheduler gracefully and wait for background task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.join_handle.await.context("retry scheduler join failed")?;
        Ok(())
    }
}

pub struct RetryScheduler {
    executor: Arc<dyn DeliveryExecutor>,
    config: RetrySchedulerConfig,
}

impl RetryScheduler {
    pub fn new(executor: Arc<dyn DeliveryExecutor>, config: RetrySchedulerConfig) -> Self {
        Self { executor, config }
    }

    pub fn start(self: Arc<Self>) -> RetrySchedulerHandle {
        let (trigger_tx, mut trigger_rx) = mpsc::channel(self.config.manual_trigger_buffer.max(1));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let scheduler = self.clone();
        let join_handle = tokio::spawn(async move {
            info!(poll_interval = ?scheduler.config.poll_interval, "retry scheduler started");
            let mut ticker = time::interval(scheduler.config.poll_interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("retry scheduler shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => scheduler.run_once().await,
                    maybe = trigger_rx.recv() => {
                        if maybe.is_some() {
                            debug!("manual retry trigger received");
                            scheduler.run_once().await;
                        }
                    }
                }
            }

            info!("retry scheduler loop exiting");
        });

        RetrySchedulerHandle { trigger_tx, shutdown_tx, join_handle }
    }

    /// Una pasada; los errores se registran y el bucle continúa.
    async fn run_once(&self) {
        match self.executor.run_cycle().await {
            Ok(report) if report.claimed > 0 || report.closed > 0 => {
                debug!(
                    claimed = report.claimed,
                    sent = report.sent,
                    rescheduled = report.rescheduled,
                    rate_limited = report.rate_limited,
                    closed = report.closed,
                    "delivery cycle finished"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "delivery cycle failed"),
        }
    }
}
