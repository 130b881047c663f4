use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RunId = Uuid;

/// Contadores de un stage en un run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub name: String,
    pub kind: String,
    pub records_in: u64,
    pub records_out: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStats {
    pub slot: String,
    pub stage: String,
    pub endpoint: String,
    pub records_written: u64,
}

/// Resultado de un run exitoso.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,

    /// -------- Métricas del run --------
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_read: u64,

    /// En orden topológico.
    pub stages: Vec<StageStats>,
    pub sinks: Vec<SinkStats>,
}

impl RunReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn stage(&self, name: &str) -> Option<&StageStats> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Registros escritos en un slot de sink.
    pub fn records_written(&self, slot: &str) -> Option<u64> {
        self.sinks
            .iter()
            .find(|s| s.slot == slot)
            .map(|s| s.records_written)
    }

    pub fn total_written(&self) -> u64 {
        self.sinks.iter().map(|s| s.records_written).sum()
    }
}
