use crate::candidate::{Candidate, FitnessScore};
use crate::error::Error;
use crate::genome::Genome;
use crate::meta::RunConfig;
use crate::selection::Selection;
use log::{info, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use tangram_finite::FiniteF64;

/// Assigns a fitness score to every candidate it is handed.
pub trait PopulationEvaluator<G>: Send + 'static {
    fn evaluate(&mut self, candidates: &[Arc<Candidate<G>>]) -> Result<(), Error>;
}

pub struct FnEvaluator<F>(F);

/// Evaluates candidates one by one with a plain function of the genome.
pub fn make_fitness_fn<G, F>(fitness_fn: F) -> FnEvaluator<F>
where
    F: FnMut(&G) -> FitnessScore + Send + 'static,
{
    FnEvaluator(fitness_fn)
}

impl<G, F> PopulationEvaluator<G> for FnEvaluator<F>
where
    F: FnMut(&G) -> FitnessScore + Send + 'static,
{
    fn evaluate(&mut self, candidates: &[Arc<Candidate<G>>]) -> Result<(), Error> {
        for candidate in candidates {
            candidate.set_fitness((self.0)(candidate.genome()))?;
        }
        Ok(())
    }
}

/// Orders best-first: highest fitness, then lowest id.
#[derive(Ord, Eq, PartialEq, PartialOrd, Clone, Debug)]
struct IndividualOrderingKey {
    fitness: Reverse<FiniteF64>,
    id: usize,
}

impl IndividualOrderingKey {
    fn of<G>(candidate: &Candidate<G>) -> Result<Self, Error> {
        let candidate_id = candidate.id();
        let fitness = candidate
            .fitness()
            .ok_or(Error::FitnessMissing { candidate_id })?;
        let fitness = FiniteF64::new(fitness.primary)
            .map_err(|_| Error::FitnessMustBeFinite { candidate_id })?;

        Ok(Self {
            fitness: Reverse(fitness),
            id: candidate_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStats {
    pub num_evaluated: usize,
    pub best_fitness: f64,
    pub mean_fitness: f64,
}

/// Population state of one evolutionary run.
pub struct AlgoContext<G> {
    config: RunConfig,
    selection: Selection,
    crossover: Bernoulli,
    population: Vec<Arc<Candidate<G>>>,
    best_seen: Option<(FiniteF64, Arc<Candidate<G>>)>,
    rng: StdRng,
    next_id: usize,
}

impl<G: Genome> AlgoContext<G> {
    /// Seeds the initial population. Seeds beyond the population size are
    /// ignored; missing members are mutants of the seeds, taken in turn.
    pub fn new(config: RunConfig, seeds: Vec<G>) -> Result<Self, Error> {
        config.validate()?;

        if seeds.is_empty() {
            return Err(Error::NoSeedGenomes);
        }

        let crossover_prob = config.crossover_params.crossover_prob;
        let crossover = Bernoulli::new(crossover_prob).map_err(|_| {
            Error::ProbabilityOutOfRange {
                name: "crossover probability",
                value: crossover_prob,
            }
        })?;

        let mut ctx = Self {
            selection: Selection::new(&config.crossover_params)?,
            crossover,
            population: Vec::with_capacity(config.population_size),
            best_seen: None,
            rng: StdRng::seed_from_u64(config.seed),
            next_id: 0,
            config,
        };

        let mut seed_cycle = seeds.iter().cycle();
        for index in 0..ctx.config.population_size {
            let genome = match seed_cycle.next() {
                Some(seed) if index < seeds.len() => seed.clone(),
                Some(seed) => seed.mutate(&ctx.config.mutation_params, &mut ctx.rng),
                None => break,
            };
            let id = ctx.make_id();
            ctx.population.push(Arc::new(Candidate::new(id, genome)));
        }

        Ok(ctx)
    }

    fn make_id(&mut self) -> usize {
        let result = self.next_id;
        self.next_id += 1;
        result
    }

    pub fn population(&self) -> &[Arc<Candidate<G>>] {
        &self.population
    }

    pub fn best_seen(&self) -> Option<&Arc<Candidate<G>>> {
        self.best_seen.as_ref().map(|(_, candidate)| candidate)
    }

    pub fn peek_best_seen_fitness(&self) -> Option<f64> {
        self.best_seen.as_ref().map(|(fitness, _)| fitness.get())
    }

    /// Evaluates the members without a score, ranks the population and
    /// replaces it with the elites plus offspring of selected parents.
    pub fn advance(
        &mut self,
        evaluator: &mut dyn PopulationEvaluator<G>,
    ) -> Result<GenerationStats, Error> {
        let pending: Vec<Arc<Candidate<G>>> = self
            .population
            .iter()
            .filter(|candidate| !candidate.is_evaluated())
            .cloned()
            .collect();

        if !pending.is_empty() {
            evaluator.evaluate(&pending)?;
        }

        let ranked = self
            .population
            .iter()
            .map(|candidate| -> Result<_, Error> {
                Ok((IndividualOrderingKey::of(candidate)?, candidate.clone()))
            })
            .collect::<Result<BTreeMap<_, _>, Error>>()?;

        let mean_fitness = ranked
            .keys()
            .map(|key| key.fitness.0.get())
            .sum::<f64>()
            / ranked.len() as f64;

        let (best_key, best) = ranked
            .iter()
            .next()
            .map(|(key, candidate)| (key.clone(), candidate.clone()))
            .ok_or(Error::ZeroPopulationSize)?;

        self.process_best(best_key.fitness.0, best);

        let ranked: Vec<Arc<Candidate<G>>> = ranked.into_values().collect();
        let stats = GenerationStats {
            num_evaluated: pending.len(),
            best_fitness: best_key.fitness.0.get(),
            mean_fitness,
        };

        self.population = self.next_population(&ranked)?;
        Ok(stats)
    }

    fn process_best(&mut self, fitness: FiniteF64, candidate: Arc<Candidate<G>>) {
        let new_best = self
            .best_seen
            .as_ref()
            .map(|(best_fitness, _)| fitness > *best_fitness)
            .unwrap_or(true);

        if new_best {
            info!("New best fitness: {}", fitness.get());
            self.best_seen = Some((fitness, candidate));
        }
    }

    fn next_population(
        &mut self,
        ranked: &[Arc<Candidate<G>>],
    ) -> Result<Vec<Arc<Candidate<G>>>, Error> {
        let mut next: Vec<Arc<Candidate<G>>> =
            ranked.iter().take(self.config.elite_count).cloned().collect();

        let parents: Vec<&G> = ranked.iter().map(|candidate| candidate.genome()).collect();

        while next.len() < self.config.population_size {
            let genome = self.create_offspring(&parents)?;
            let id = self.make_id();
            next.push(Arc::new(Candidate::new(id, genome)));
        }

        Ok(next)
    }

    fn create_offspring(&mut self, parents_ordered: &[&G]) -> Result<G, Error> {
        let first = *parents_ordered.first().ok_or(Error::ZeroPopulationSize)?;
        let parent = self
            .selection
            .select_ref(parents_ordered, &mut self.rng)
            .unwrap_or(first);

        let crossover_result = if self.crossover.sample(&mut self.rng) {
            let other = self
                .selection
                .select_ref(parents_ordered, &mut self.rng)
                .unwrap_or(first);
            parent.crossover(other, &mut self.rng)
        } else {
            parent.clone()
        };

        trace!("Offspring created");

        Ok(crossover_result.mutate(&self.config.mutation_params, &mut self.rng))
    }
}
