// src/domain/model/severity.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Representa el nivel de criticidad de una alerta.
/// Define la prioridad de entrega cuando los canales están limitados por cuota:
/// critical > high > medium > low > info.
///
/// El orden de declaración es ascendente para que `Ord` derive esa prioridad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Información general, sin impacto operativo inmediato.
    Info,
    /// Desviación menor, revisar en el día.
    Low,
    /// Requiere atención preventiva.
    Medium,
    /// Impacto alto en ventas o comisiones.
    High,
    /// Acción inmediata requerida.
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Prioridad numérica en la cola (mayor = más urgente).
    pub fn priority(self) -> u8 {
        match self {
            Severity::Info => 1,
            Severity::Low => 3,
            Severity::Medium => 5,
            Severity::High => 8,
            Severity::Critical => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Severity::Info => "Información: sin impacto operativo inmediato.",
            Severity::Low => "Baja: desviación menor, revisar en el día.",
            Severity::Medium => "Media: requiere atención preventiva.",
            Severity::High => "Alta: impacto relevante en ventas o comisiones.",
            Severity::Critical => "Crítica: acción inmediata requerida.",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" | "crit" | "critica" | "crítica" => Ok(Severity::Critical),
            "high" | "alta" => Ok(Severity::High),
            "medium" | "warning" | "warn" | "media" => Ok(Severity::Medium),
            "low" | "baja" => Ok(Severity::Low),
            "info" => Ok(Severity::Info),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}
