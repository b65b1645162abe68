// src/domain/model/channel.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Canales de notificación soportados por el despachador.
///
/// El formateo específico (HTML para email, 160 caracteres para SMS, bloques de
/// Slack) es responsabilidad del adaptador, no del despachador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    Email,
    Sms,
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Slack,
    Push,
    Webhook,
    InApp,
}

impl ChannelId {
    pub const ALL: [ChannelId; 7] = [
        ChannelId::Email,
        ChannelId::Sms,
        ChannelId::WhatsApp,
        ChannelId::Slack,
        ChannelId::Push,
        ChannelId::Webhook,
        ChannelId::InApp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelId::Email => "email",
            ChannelId::Sms => "sms",
            ChannelId::WhatsApp => "whatsapp",
            ChannelId::Slack => "slack",
            ChannelId::Push => "push",
            ChannelId::Webhook => "webhook",
            ChannelId::InApp => "in_app",
        }
    }

    /// Objetivo de latencia extremo a extremo documentado para el canal.
    pub fn latency_target(self) -> Duration {
        match self {
            ChannelId::Email => Duration::from_secs(2),
            ChannelId::Sms => Duration::from_secs(3),
            _ => Duration::from_secs(5),
        }
    }
}

impl FromStr for ChannelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" | "mail" => Ok(ChannelId::Email),
            "sms" => Ok(ChannelId::Sms),
            "whatsapp" => Ok(ChannelId::WhatsApp),
            "slack" => Ok(ChannelId::Slack),
            "push" => Ok(ChannelId::Push),
            "webhook" => Ok(ChannelId::Webhook),
            "in_app" | "inapp" | "in-app" => Ok(ChannelId::InApp),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
