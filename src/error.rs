use crate::run::RunState;
use crate::worker::WorkerFault;
use std::io;
use thiserror;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid YAML")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    WorkerFault(#[from] WorkerFault),
    #[error("scheduler has been shut down")]
    SchedulerShutDown,
    #[error("scheduler thread panicked")]
    SchedulerThreadPanicked,
    #[error("evaluator pool size must be strictly positive")]
    ZeroPoolSize,
    #[error("batch must contain at least one candidate")]
    EmptyBatch,
    #[error("batch evaluation timed out")]
    EvaluationTimedOut,
    #[error("batch worker was removed before all candidates were evaluated")]
    BatchAbandoned,
    #[error("cannot block on work driven by the current scheduler thread")]
    BlockingOnSchedulerThread,
    #[error("candidate {candidate_id}: fitness already assigned")]
    FitnessAlreadyAssigned { candidate_id: usize },
    #[error("candidate {candidate_id}: fitness missing after evaluation")]
    FitnessMissing { candidate_id: usize },
    #[error("candidate {candidate_id}: fitness must be finite")]
    FitnessMustBeFinite { candidate_id: usize },
    #[error("evaluator failed: {}", .0)]
    EvaluatorFailed(String),
    #[error("conflicting termination criteria")]
    ConflictingTerminationCriteria,
    #[error("target fitness must be finite")]
    TargetFitnessMustBeFinite,
    #[error("population size must be strictly positive")]
    ZeroPopulationSize,
    #[error("at least one seed genome is required")]
    NoSeedGenomes,
    #[error("elite count {elite_count} must be lower than population size {population_size}")]
    TooManyElites {
        elite_count: usize,
        population_size: usize,
    },
    #[error("{name} must be in [0, 1], got {value}")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },
    #[error("mutation scale must be strictly positive and finite")]
    InvalidMutationScale,
    #[error("progress update cadence must be strictly positive")]
    ZeroUpdateCadence,
    #[error("run is {actual}, expected {expected}")]
    InvalidRunState {
        expected: RunState,
        actual: RunState,
    },
}
