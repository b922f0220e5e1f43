use crate::meta::MutationParams;
use itertools::{EitherOrBoth, Itertools};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Bernoulli, Cauchy, Distribution};
use serde::{Deserialize, Serialize};

/// Reproduction operators of an evolvable genome.
pub trait Genome: Clone + Send + Sync + 'static {
    fn mutate(&self, mutation_params: &MutationParams, rng: &mut StdRng) -> Self;

    fn crossover(&self, other: &Self, rng: &mut StdRng) -> Self;
}

/// A fixed-length vector of real-valued genes, optionally clamped to bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealVector {
    pub genes: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<(f64, f64)>,
}

impl RealVector {
    pub fn new(genes: Vec<f64>) -> Self {
        Self {
            genes,
            bounds: None,
        }
    }

    pub fn bounded(genes: Vec<f64>, min: f64, max: f64) -> Self {
        Self {
            genes: genes.into_iter().map(|gene| gene.clamp(min, max)).collect(),
            bounds: Some((min, max)),
        }
    }
}

pub(crate) fn mutate_real(
    value: f64,
    bounds: Option<(f64, f64)>,
    mutation_params: &MutationParams,
    rng: &mut StdRng,
) -> f64 {
    let mutate = match Bernoulli::new(mutation_params.mutation_prob) {
        Ok(dist) => dist.sample(rng),
        Err(_) => false,
    };

    if !mutate {
        return value;
    }

    let value = match Cauchy::new(value, mutation_params.mutation_scale) {
        Ok(dist) => dist.sample(rng),
        Err(_) => value,
    };

    match bounds {
        Some((min, max)) => value.clamp(min, max),
        None => value,
    }
}

impl Genome for RealVector {
    fn mutate(&self, mutation_params: &MutationParams, rng: &mut StdRng) -> Self {
        Self {
            genes: self
                .genes
                .iter()
                .map(|gene| mutate_real(*gene, self.bounds, mutation_params, rng))
                .collect(),
            bounds: self.bounds,
        }
    }

    /// Uniform crossover over the common prefix; surplus genes come from `self`.
    fn crossover(&self, other: &Self, rng: &mut StdRng) -> Self {
        let genes = self
            .genes
            .iter()
            .zip_longest(other.genes.iter())
            .filter_map(|pair| match pair {
                EitherOrBoth::Both(own, theirs) => {
                    Some(if rng.gen::<bool>() { *own } else { *theirs })
                }
                EitherOrBoth::Left(own) => Some(*own),
                EitherOrBoth::Right(_) => None,
            })
            .collect();

        Self {
            genes,
            bounds: self.bounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tangram_finite::FiniteF64;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0)
    }

    #[test]
    fn mutate_real_guaranteed_not() {
        let mutation_params = MutationParams {
            mutation_prob: 0.0,
            mutation_scale: 1.0,
        };

        let result = mutate_real(10.0, None, &mutation_params, &mut rng());

        assert_eq!(result, 10.0);
    }

    #[test]
    fn mutate_real_guaranteed() {
        let mutation_params = MutationParams {
            mutation_prob: 1.0,
            mutation_scale: 1.0,
        };

        let result = mutate_real(10.0, None, &mutation_params, &mut rng());

        assert_ne!(result, 10.0);
    }

    #[test]
    fn mutate_real_min_and_max() {
        let mutation_params = MutationParams {
            mutation_prob: 1.0,
            mutation_scale: 10.0,
        };

        let mut rng = rng();
        const N: usize = 500;

        let values: Vec<FiniteF64> = (0..N)
            .map(|_| mutate_real(10.0, Some((9.0, 11.0)), &mutation_params, &mut rng))
            .map(|val| FiniteF64::new(val).unwrap())
            .collect();

        let min_found = values.iter().min().unwrap().get();
        let max_found = values.iter().max().unwrap().get();

        assert!(min_found >= 9.0);
        assert!(min_found < 10.0);
        assert!(max_found <= 11.0);
        assert!(max_found > 10.0);
    }

    #[test]
    fn crossover_mixes_parent_genes() {
        let a = RealVector::new(vec![0.0; 64]);
        let b = RealVector::new(vec![1.0; 64]);

        let child = a.crossover(&b, &mut rng());

        assert_eq!(child.genes.len(), 64);
        assert!(child.genes.contains(&0.0));
        assert!(child.genes.contains(&1.0));
    }

    #[test]
    fn crossover_keeps_own_length() {
        let a = RealVector::new(vec![0.0; 3]);
        let b = RealVector::new(vec![1.0; 5]);

        assert_eq!(a.crossover(&b, &mut rng()).genes.len(), 3);
        assert_eq!(b.crossover(&a, &mut rng()).genes.len(), 5);
    }
}
