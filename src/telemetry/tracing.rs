// src/telemetry/tracing.rs
//! Inicialización del subscriber de `tracing`.
//!
//! `RUST_LOG` tiene prioridad sobre el nivel configurado. El formato JSON se
//! activa con `logging.json = true` para agregadores de logs.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::app_config::LoggingConfig;

/// Instala el subscriber global. Devuelve error si ya había uno instalado o el
/// filtro es inválido; el llamador decide si continuar.
pub fn init_tracing(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&cfg.level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cfg.json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }
    Ok(())
}

/// Subscriber para tests: escribe en el capturador de libtest e ignora reinicializaciones.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
