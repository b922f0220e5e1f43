use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PauseReason {
    Requested,
    StopCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub generation: u64,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub best_seen_fitness: f64,
}

/// Notifications published by a generational run to its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunEvent {
    Started,
    Resumed { generation: u64 },
    Progress(RunProgress),
    Paused { generation: u64, reason: PauseReason },
    Faulted { generation: u64, message: String },
}
