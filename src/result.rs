use crate::candidate::FitnessScore;
use crate::run::RunState;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary<G> {
    pub state: RunState,
    pub generation: u64,
    pub best_seen: Option<BestSeen<G>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestSeen<G> {
    pub candidate_id: usize,
    pub fitness: FitnessScore,
    pub genome: G,
}

impl<G> fmt::Display for RunSummary<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "State: {}", self.state)?;
        writeln!(f, "Generations completed: {}", self.generation)?;
        match &self.best_seen {
            Some(best_seen) => write!(
                f,
                "Best fitness seen: {} (candidate {})",
                best_seen.fitness.primary, best_seen.candidate_id
            ),
            None => write!(f, "Best fitness seen: none"),
        }
    }
}
