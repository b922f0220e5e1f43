use self::TerminationCriterion::*;
use crate::error::Error;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub enum TerminationCriterion {
    NumGenerations(u64),
    TargetFitness(f64),
    TerminateAfter(Duration),
}

/// The combined stop condition of a generational run. Any satisfied
/// criterion stops the run.
#[derive(Debug, Clone, Default)]
pub struct StopCondition {
    pub max_num_generations: Option<u64>,
    pub target_fitness: Option<f64>,
    pub terminate_after: Option<Duration>,
}

impl StopCondition {
    /// `running_since` is measured from the most recent start or resume.
    pub fn is_satisfied(
        &self,
        generation: u64,
        best_fitness: Option<f64>,
        running_since: Instant,
    ) -> bool {
        let generations_reached = self
            .max_num_generations
            .map(|max| generation >= max)
            .unwrap_or(false);

        let target_reached = match (self.target_fitness, best_fitness) {
            (Some(target), Some(best)) => best >= target,
            _ => false,
        };

        let time_elapsed = self
            .terminate_after
            .map(|after| running_since.elapsed() >= after)
            .unwrap_or(false);

        generations_reached || target_reached || time_elapsed
    }
}

pub fn compile<T>(termination_criteria: T) -> Result<StopCondition, Error>
where
    T: IntoIterator<Item = TerminationCriterion>,
{
    let mut max_num_generations = None;
    let mut target_fitness = None;
    let mut terminate_after = None;

    for criterion in termination_criteria {
        match criterion {
            NumGenerations(num) if max_num_generations.is_none() => {
                max_num_generations = Some(num)
            }
            TargetFitness(target) if target_fitness.is_none() => {
                if !target.is_finite() {
                    return Err(Error::TargetFitnessMustBeFinite);
                }
                target_fitness = Some(target)
            }
            TerminateAfter(duration) if terminate_after.is_none() => {
                terminate_after = Some(duration)
            }
            _ => return Err(Error::ConflictingTerminationCriteria),
        }
    }

    Ok(StopCondition {
        max_num_generations,
        target_fitness,
        terminate_after,
    })
}
