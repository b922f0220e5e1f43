use crate::error::Error;
use crate::meta::CrossoverParams;
use rand::{rngs::StdRng, seq::SliceRandom};
use rand_distr::{Bernoulli, Distribution};

/// Rank-based selection: walk the individuals best-first and take each one
/// with probability `selection_pressure`, falling back to a uniform pick.
pub struct Selection {
    pressure: Bernoulli,
}

impl Selection {
    pub fn new(crossover_params: &CrossoverParams) -> Result<Self, Error> {
        let pressure = Bernoulli::new(crossover_params.selection_pressure).map_err(|_| {
            Error::ProbabilityOutOfRange {
                name: "selection pressure",
                value: crossover_params.selection_pressure,
            }
        })?;

        Ok(Self { pressure })
    }

    /// `individuals_ordered` must be non-empty and ordered best-first.
    pub fn select_ref<'a, T>(
        &self,
        individuals_ordered: &[&'a T],
        rng: &mut StdRng,
    ) -> Option<&'a T> {
        for individual in individuals_ordered {
            if self.pressure.sample(rng) {
                return Some(*individual);
            }
        }

        individuals_ordered.choose(rng).copied()
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;
    use rand::SeedableRng;
    use rand_distr::num_traits::ToPrimitive;

    use super::*;

    #[test]
    fn maximum_selection_pressure() {
        assert_freqs(1.0, 1.0, 0.0);
    }

    #[test]
    fn some_selection_pressure() {
        assert_freqs(0.5, 0.625, 0.375);
    }

    #[test]
    fn no_selection_pressure() {
        assert_freqs(0.0, 0.5, 0.5);
    }

    #[test]
    fn empty_selects_nothing() {
        let sut = Selection::new(&CrossoverParams::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(sut.select_ref::<u8>(&[], &mut rng), None);
    }

    const EPSILON: f64 = 0.01;

    fn assert_freqs(selection_pressure: f64, expected_freq_0: f64, expected_freq_1: f64) {
        let mut rng = StdRng::seed_from_u64(0);

        let crossover_params = CrossoverParams {
            crossover_prob: 0.0,
            selection_pressure,
        };
        let sut = Selection::new(&crossover_params).unwrap();

        let individuals_ordered = [&0, &1];

        const N: usize = 10000;
        let mut counts = vec![0, 0];
        for _ in 0..N {
            let selected_individual = sut.select_ref(&individuals_ordered, &mut rng).unwrap();
            counts[*selected_individual] += 1;
        }

        let freqs: Vec<f64> = counts
            .iter()
            .map(|count| count.to_f64().unwrap() / N.to_f64().unwrap())
            .collect();

        assert!(approx_eq!(
            f64,
            freqs[0],
            expected_freq_0,
            epsilon = EPSILON
        ));

        assert!(approx_eq!(
            f64,
            freqs[1],
            expected_freq_1,
            epsilon = EPSILON
        ));
    }
}
