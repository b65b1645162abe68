// src/service/rate_limiter.rs
//! Cuota por canal (mensajes por minuto, ventana fija).
//!
//! No bloquea: el despachador pide hasta N envíos y recibe los que caben en la
//! ventana. Lo que no cabe vuelve a la cola sin consumir un intento. El
//! despachador reserva el cupo recorriendo las entradas reclamadas en orden de
//! severidad, así que un aviso crítico agota el cupo antes que uno menor.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::model::channel::ChannelId;

struct Window {
    started: DateTime<Utc>,
    used: u32,
}

pub struct ChannelRateLimiter {
    limits: HashMap<ChannelId, u32>,
    windows: Mutex<HashMap<ChannelId, Window>>,
}

impl ChannelRateLimiter {
    /// `limits`: máximo por minuto; 0 o ausente = sin límite.
    pub fn new(limits: HashMap<ChannelId, u32>) -> Self {
        Self { limits, windows: Mutex::new(HashMap::new()) }
    }

    /// Reserva hasta `wanted` envíos en la ventana actual y devuelve cuántos caben.
    pub async fn acquire_up_to(&self, channel: ChannelId, wanted: u32, now: DateTime<Utc>) -> u32 {
        let limit = match self.limits.get(&channel) {
            Some(l) if *l > 0 => *l,
            _ => return wanted,
        };
        let mut windows = self.windows.lock().await;
        let w = windows.entry(channel).or_insert(Window { started: now, used: 0 });
        if now - w.started >= Duration::minutes(1) {
            w.started = now;
            w.used = 0;
        }
        let granted = wanted.min(limit.saturating_sub(w.used));
        w.used += granted;
        granted
    }

    /// Momento en que se reabre la ventana del canal.
    pub async fn next_window(&self, channel: ChannelId, now: DateTime<Utc>) -> DateTime<Utc> {
        let windows = self.windows.lock().await;
        windows
            .get(&channel)
            .map(|w| w.started + Duration::minutes(1))
            .filter(|t| *t > now)
            .unwrap_or(now)
    }
}
