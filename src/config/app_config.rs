// src/config/app_config.rs

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::info;

use crate::config::channel_config::ChannelConfig;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::severity::Severity;

/// Estructura principal que representa la configuración de la aplicación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Sobrescrituras por canal; los canales ausentes usan `ChannelConfig::default_for`.
    #[serde(default)]
    pub channels: BTreeMap<ChannelId, ChannelConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub profile: String, // "development", "staging", "production"
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), json: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Moneda de reporte cuando no hay registros ni instantánea.
    pub currency: String,
    pub cache_ttl_secs: u64,
    pub latency_target_ms: u64,
    /// Límite duro de un cálculo; al vencer se descarta sin publicar en caché.
    pub timeout_ms: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            currency: "EUR".into(),
            cache_ttl_secs: 60,
            latency_target_ms: 200,
            timeout_ms: 5_000,
        }
    }
}

impl ReportingConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn latency_target(&self) -> Duration {
        Duration::from_millis(self.latency_target_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Cuantil normal del intervalo (1.96 ≈ 95%).
    pub confidence_z: f64,
    /// Umbral de puntuación en [0, 1] a partir del cual un punto es anómalo.
    pub anomaly_score_threshold: f64,
    /// Desviación (en sigmas) que corresponde a la puntuación 0.5.
    pub zscore_scale: f64,
    /// Umbral propio del bosque de aislamiento (su puntuación ronda 0.5 en datos normales).
    pub isolation_score_threshold: f64,
    pub isolation_trees: usize,
    pub isolation_sample_size: usize,
    pub isolation_seed: u64,
    pub max_horizon_days: u32,
    pub anomaly_latency_target_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            confidence_z: 1.96,
            anomaly_score_threshold: 0.8,
            zscore_scale: 1.5,
            isolation_score_threshold: 0.65,
            isolation_trees: 100,
            isolation_sample_size: 64,
            isolation_seed: 42,
            max_horizon_days: 365,
            anomaly_latency_target_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub suppression_window_secs: u64,
    pub deadline_critical_secs: u64,
    pub deadline_high_secs: u64,
    pub deadline_medium_secs: u64,
    pub deadline_low_secs: u64,
    pub deadline_info_secs: u64,
    /// Tras este plazo un envío aceptado por un adaptador sin confirmación se da por entregado.
    pub confirmation_timeout_secs: u64,
    pub max_concurrency: usize,
    /// Entradas reclamadas por ciclo del worker.
    pub claim_batch: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            suppression_window_secs: 15 * 60,
            deadline_critical_secs: 15 * 60,
            deadline_high_secs: 30 * 60,
            deadline_medium_secs: 60 * 60,
            deadline_low_secs: 4 * 60 * 60,
            deadline_info_secs: 24 * 60 * 60,
            confirmation_timeout_secs: 30,
            max_concurrency: 16,
            claim_batch: 64,
        }
    }
}

impl DispatcherConfig {
    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    pub fn deadline_for(&self, severity: Severity) -> Duration {
        let secs = match severity {
            Severity::Critical => self.deadline_critical_secs,
            Severity::High => self.deadline_high_secs,
            Severity::Medium => self.deadline_medium_secs,
            Severity::Low => self.deadline_low_secs,
            Severity::Info => self.deadline_info_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub retry_poll_interval_ms: u64,
    pub purge_interval_secs: u64,
    /// Las alertas terminales más antiguas que esto se eliminan.
    pub alert_retention_secs: u64,
    /// Periodo de evaluación de reglas; 0 = sólo bajo demanda.
    #[serde(default)]
    pub rule_eval_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_poll_interval_ms: 250,
            purge_interval_secs: 300,
            alert_retention_secs: 7 * 24 * 60 * 60,
            rule_eval_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8080".into() }
    }
}

/// Organigrama inicial del directorio en memoria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub seed_file: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { seed_file: "config/directory.yaml".into() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            environment: EnvironmentConfig { profile: "development".into() },
            logging: LoggingConfig::default(),
            reporting: ReportingConfig::default(),
            forecast: ForecastConfig::default(),
            dispatcher: DispatcherConfig::default(),
            channels: BTreeMap::new(),
            scheduler: SchedulerConfig::default(),
            http: HttpConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Configuración efectiva de un canal.
    pub fn channel(&self, channel: ChannelId) -> ChannelConfig {
        self.channels
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| ChannelConfig::default_for(channel))
    }

    /// Validar configuración con reglas de negocio.
    pub fn validate(&self) -> Result<()> {
        let valid_profiles = ["development", "staging", "production"];
        if !valid_profiles.contains(&self.environment.profile.as_str()) {
            bail!(
                "Invalid environment profile '{}', must be one of {:?}",
                self.environment.profile,
                valid_profiles
            );
        }

        if self.reporting.cache_ttl_secs == 0 {
            bail!("reporting.cache_ttl_secs must be positive");
        }
        let code = self.reporting.currency.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            bail!("reporting.currency must be an ISO 4217 code, got '{}'", self.reporting.currency);
        }

        let f = &self.forecast;
        if !(0.0..=1.0).contains(&f.anomaly_score_threshold) {
            bail!("forecast.anomaly_score_threshold must be within [0, 1]");
        }
        if f.confidence_z <= 0.0 || f.zscore_scale <= 0.0 {
            bail!("forecast.confidence_z and forecast.zscore_scale must be positive");
        }
        if f.isolation_trees == 0 || f.isolation_sample_size < 2 {
            bail!("forecast isolation settings need at least one tree and a sample of two");
        }
        if f.max_horizon_days == 0 {
            bail!("forecast.max_horizon_days must be positive");
        }

        let d = &self.dispatcher;
        if d.suppression_window_secs == 0 {
            bail!("dispatcher.suppression_window_secs must be positive");
        }
        for s in Severity::ALL {
            if d.deadline_for(s).is_zero() {
                bail!("dispatcher deadline for {s} must be positive");
            }
        }
        if d.max_concurrency == 0 || d.claim_batch == 0 {
            bail!("dispatcher.max_concurrency and dispatcher.claim_batch must be positive");
        }

        for (id, channel) in &self.channels {
            channel.validate(*id)?;
        }

        if self.scheduler.retry_poll_interval_ms == 0 || self.scheduler.purge_interval_secs == 0 {
            bail!("scheduler intervals must be positive");
        }

        Ok(())
    }
}

/// Wrapper para manejar configuración compartida y recargable.
#[derive(Clone)]
pub struct SharedAppConfig {
    inner: Arc<RwLock<AppConfig>>,
    sender: Arc<watch::Sender<AppConfig>>,
    pub watcher: watch::Receiver<AppConfig>,
}

impl SharedAppConfig {
    pub fn new(cfg: AppConfig) -> Self {
        let (tx, rx) = watch::channel(cfg.clone());
        Self {
            inner: Arc::new(RwLock::new(cfg)),
            sender: Arc::new(tx),
            watcher: rx,
        }
    }

    /// Carga en capas: valores por defecto, archivos en orden (el último gana) y
    /// variables de entorno `APP__SECCION__CLAVE`.
    pub async fn load_from_sources(config_paths: &[PathBuf]) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default()).context("Failed to encode default configuration")?;
        let mut cfg = Config::builder().add_source(defaults);

        for path in config_paths {
            if path.exists() {
                cfg = cfg.add_source(File::from(path.clone()));
                info!("Loaded config file: {:?}", path);
            } else {
                info!("Config file not found, skipping: {:?}", path);
            }
        }

        cfg = cfg.add_source(Environment::with_prefix("APP").prefix_separator("__").separator("__"));

        let built = cfg.build().context("Failed to build configuration")?;
        let app_config: AppConfig = built
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(Self::new(app_config))
    }

    /// Rutas por defecto: `config/default.toml` y `config/{profile}.toml`.
    pub fn default_paths(profile: &str) -> Vec<PathBuf> {
        vec![
            PathBuf::from("config/default.toml"),
            PathBuf::from(format!("config/{profile}.toml")),
        ]
    }

    /// Obtener la configuración actual (snapshot)
    pub async fn get_config(&self) -> AppConfig {
        self.inner.read().await.clone()
    }

    /// Reemplaza la configuración tras validarla y notifica a los observadores.
    pub async fn update_config(&self, new_cfg: AppConfig) -> Result<()> {
        new_cfg.validate()?;
        {
            let mut writable = self.inner.write().await;
            *writable = new_cfg.clone();
        }
        self.sender.send_replace(new_cfg);
        Ok(())
    }
}
