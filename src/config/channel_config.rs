// src/config/channel_config.rs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::model::channel::ChannelId;
use crate::domain::model::delivery_status::RetryPolicy;

/// Política de entrega de un canal: prioridad, cuota y reintentos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Orden de despacho dentro de una misma severidad (menor = antes).
    pub priority: u8,
    /// Cuota de envíos por minuto; 0 = sin límite.
    #[serde(default)]
    pub max_per_minute: u32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    pub max_total_wait_ms: u64,
    pub latency_target_ms: u64,
    /// Endpoint del adaptador (sólo webhook).
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl ChannelConfig {
    /// Valores por defecto por canal.
    pub fn default_for(channel: ChannelId) -> Self {
        let (priority, max_attempts, initial_backoff_ms, max_total_wait_ms) = match channel {
            ChannelId::Email => (1, 5, 2_000, 600_000),
            ChannelId::Sms => (2, 4, 2_000, 300_000),
            ChannelId::WhatsApp => (3, 4, 2_000, 300_000),
            ChannelId::Slack => (4, 5, 1_000, 300_000),
            ChannelId::Push => (5, 3, 1_000, 120_000),
            ChannelId::Webhook => (6, 6, 1_000, 600_000),
            ChannelId::InApp => (7, 3, 500, 60_000),
        };
        ChannelConfig {
            enabled: true,
            priority,
            max_per_minute: 0,
            max_attempts,
            initial_backoff_ms,
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            max_total_wait_ms,
            latency_target_ms: channel.latency_target().as_millis() as u64,
            endpoint: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_total_wait: Duration::from_millis(self.max_total_wait_ms),
        }
    }

    pub fn latency_target(&self) -> Duration {
        Duration::from_millis(self.latency_target_ms)
    }

    pub fn validate(&self, channel: ChannelId) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("channel '{channel}' must allow at least one attempt");
        }
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            bail!("channel '{channel}' backoff multiplier must be >= 1 (got {})", self.multiplier);
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            bail!("channel '{channel}' initial backoff exceeds max backoff");
        }
        if self.max_total_wait_ms == 0 {
            bail!("channel '{channel}' max_total_wait_ms must be positive");
        }
        if let Some(url) = &self.endpoint {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("channel '{channel}' endpoint must be an http(s) URL");
            }
        }
        Ok(())
    }
}
