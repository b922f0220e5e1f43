use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_POPULATION_SIZE: usize = 50;
const DEFAULT_ELITE_COUNT: usize = 5;
const DEFAULT_UPDATE_EVERY_GENERATIONS: u64 = 10;
const DEFAULT_ELAPSED_TIME: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossoverParams {
    pub crossover_prob: f64,
    pub selection_pressure: f64,
}

impl Default for CrossoverParams {
    fn default() -> Self {
        Self {
            crossover_prob: 0.5,
            selection_pressure: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationParams {
    pub mutation_prob: f64,
    pub mutation_scale: f64,
}

impl Default for MutationParams {
    fn default() -> Self {
        Self {
            mutation_prob: 0.2,
            mutation_scale: 0.1,
        }
    }
}

/// How often a run emits a progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateScheme {
    Generations(u64),
    Interval(Duration),
}

impl Default for UpdateScheme {
    fn default() -> Self {
        UpdateScheme::Generations(DEFAULT_UPDATE_EVERY_GENERATIONS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    pub population_size: usize,
    pub elite_count: usize,
    pub crossover_params: CrossoverParams,
    pub mutation_params: MutationParams,
    pub update_scheme: UpdateScheme,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            population_size: DEFAULT_POPULATION_SIZE,
            elite_count: DEFAULT_ELITE_COUNT,
            crossover_params: CrossoverParams::default(),
            mutation_params: MutationParams::default(),
            update_scheme: UpdateScheme::default(),
            seed: 0,
        }
    }
}

fn check_prob(name: &'static str, value: f64) -> Result<(), Error> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::ProbabilityOutOfRange { name, value })
    }
}

impl RunConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, Error> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.population_size == 0 {
            return Err(Error::ZeroPopulationSize);
        }

        if self.elite_count >= self.population_size {
            return Err(Error::TooManyElites {
                elite_count: self.elite_count,
                population_size: self.population_size,
            });
        }

        check_prob("crossover probability", self.crossover_params.crossover_prob)?;
        check_prob(
            "selection pressure",
            self.crossover_params.selection_pressure,
        )?;
        check_prob("mutation probability", self.mutation_params.mutation_prob)?;

        let scale = self.mutation_params.mutation_scale;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::InvalidMutationScale);
        }

        match self.update_scheme {
            UpdateScheme::Generations(0) => Err(Error::ZeroUpdateCadence),
            UpdateScheme::Interval(interval) if interval.is_zero() => {
                Err(Error::ZeroUpdateCadence)
            }
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RunConfigBuilder {
    population_size: Option<usize>,
    elite_count: Option<usize>,
    crossover_params: Option<CrossoverParams>,
    mutation_params: Option<MutationParams>,
    update_scheme: Option<UpdateScheme>,
    seed: Option<u64>,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn population_size(&mut self, population_size: usize) -> &mut Self {
        self.population_size = Some(population_size);
        self
    }

    pub fn elite_count(&mut self, elite_count: usize) -> &mut Self {
        self.elite_count = Some(elite_count);
        self
    }

    pub fn crossover_params(&mut self, crossover_params: CrossoverParams) -> &mut Self {
        self.crossover_params = Some(crossover_params);
        self
    }

    pub fn mutation_params(&mut self, mutation_params: MutationParams) -> &mut Self {
        self.mutation_params = Some(mutation_params);
        self
    }

    pub fn update_scheme(&mut self, update_scheme: UpdateScheme) -> &mut Self {
        self.update_scheme = Some(update_scheme);
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(&self) -> Result<RunConfig, Error> {
        let defaults = RunConfig::default();

        let population_size = self.population_size.unwrap_or(defaults.population_size);
        let elite_count = self
            .elite_count
            .unwrap_or_else(|| defaults.elite_count.min(population_size.saturating_sub(1)));

        let config = RunConfig {
            population_size,
            elite_count,
            crossover_params: self
                .crossover_params
                .clone()
                .unwrap_or(defaults.crossover_params),
            mutation_params: self
                .mutation_params
                .clone()
                .unwrap_or(defaults.mutation_params),
            update_scheme: self
                .update_scheme
                .clone()
                .unwrap_or(defaults.update_scheme),
            seed: self.seed.unwrap_or(defaults.seed),
        };

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluatorConfig {
    pub pool_size: usize,
    /// Elapsed simulated time assumed for a tick whose source reports none.
    pub default_elapsed: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            default_elapsed: DEFAULT_ELAPSED_TIME,
        }
    }
}

impl EvaluatorConfig {
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_valid() {
        let config = RunConfigBuilder::new().build().unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn builder_clamps_default_elites_to_small_population() {
        let config = RunConfigBuilder::new().population_size(3).build().unwrap();
        assert_eq!(config.elite_count, 2);
    }

    #[test]
    fn rejects_too_many_elites() {
        let result = RunConfigBuilder::new()
            .population_size(4)
            .elite_count(4)
            .build();

        assert!(matches!(
            result,
            Err(Error::TooManyElites {
                elite_count: 4,
                population_size: 4
            })
        ));
    }

    #[test]
    fn rejects_probability_out_of_range() {
        let result = RunConfigBuilder::new()
            .crossover_params(CrossoverParams {
                crossover_prob: 1.5,
                selection_pressure: 0.5,
            })
            .build();

        assert!(matches!(result, Err(Error::ProbabilityOutOfRange { .. })));
    }

    #[test]
    fn rejects_zero_update_cadence() {
        let result = RunConfigBuilder::new()
            .update_scheme(UpdateScheme::Generations(0))
            .build();

        assert!(matches!(result, Err(Error::ZeroUpdateCadence)));
    }

    #[test]
    fn from_yaml_fills_defaults() {
        let yaml = "
        populationSize: 20
        eliteCount: 2
        mutationParams:
            mutationProb: 0.5
            mutationScale: 0.3
        seed: 42
        ";

        let config = RunConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.population_size, 20);
        assert_eq!(config.elite_count, 2);
        assert_eq!(config.mutation_params.mutation_prob, 0.5);
        assert_eq!(config.crossover_params, CrossoverParams::default());
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn from_yaml_validates() {
        let result = RunConfig::from_yaml_str("populationSize: 0");
        assert!(matches!(result, Err(Error::ZeroPopulationSize)));
    }
}
