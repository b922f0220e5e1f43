use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitnessScore {
    pub primary: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auxiliary: Vec<f64>,
}

impl FitnessScore {
    pub fn new(primary: f64) -> Self {
        Self {
            primary,
            auxiliary: Vec::new(),
        }
    }

    pub fn with_auxiliary(primary: f64, auxiliary: Vec<f64>) -> Self {
        Self { primary, auxiliary }
    }

    pub fn zero() -> Self {
        Self::new(0.0)
    }
}

/// An evolvable unit submitted for evaluation. The fitness slot can be
/// written exactly once.
#[derive(Debug)]
pub struct Candidate<G> {
    id: usize,
    genome: G,
    fitness: OnceLock<FitnessScore>,
}

impl<G> Candidate<G> {
    pub fn new(id: usize, genome: G) -> Self {
        Self {
            id,
            genome,
            fitness: OnceLock::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn genome(&self) -> &G {
        &self.genome
    }

    pub fn fitness(&self) -> Option<&FitnessScore> {
        self.fitness.get()
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness.get().is_some()
    }

    pub fn set_fitness(&self, fitness: FitnessScore) -> Result<(), Error> {
        self.fitness
            .set(fitness)
            .map_err(|_| Error::FitnessAlreadyAssigned {
                candidate_id: self.id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitness_is_write_once() {
        let candidate = Candidate::new(7, ());
        assert!(!candidate.is_evaluated());

        candidate.set_fitness(FitnessScore::new(1.5)).unwrap();
        let second = candidate.set_fitness(FitnessScore::new(2.0));

        assert!(matches!(
            second,
            Err(Error::FitnessAlreadyAssigned { candidate_id: 7 })
        ));
        assert_eq!(candidate.fitness(), Some(&FitnessScore::new(1.5)));
    }

    #[test]
    fn auxiliary_metrics_omitted_when_empty() {
        let json = serde_json::to_string(&FitnessScore::new(1.0)).unwrap();
        assert_eq!(json, r#"{"primary":1.0}"#);

        let json = serde_json::to_string(&FitnessScore::with_auxiliary(1.0, vec![2.0])).unwrap();
        assert_eq!(json, r#"{"primary":1.0,"auxiliary":[2.0]}"#);
    }
}
