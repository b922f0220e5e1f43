use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use lockstep::batch::{BatchEvaluator, Decoder, TickEvaluator};
use lockstep::candidate::{Candidate, FitnessScore};
use lockstep::error::Error;
use lockstep::genome::RealVector;
use lockstep::meta::{EvaluatorConfig, RunConfig};
use lockstep::run::GenerationalRun;
use lockstep::scheduler::{Scheduler, SchedulerConfig};
use lockstep::termination::TerminationCriterion;
use log::info;
use parse_duration::parse::parse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::{fs, path::PathBuf};

const TICK_SECONDS: f64 = 0.02;
const TARGET_POSITION: f64 = 1.0;
const DEFAULT_MAX_GENERATIONS: u64 = 50;

#[derive(Parser, Debug)]
#[command(author, version, about = "Evolve point-mass controllers on a shared cooperative scheduler", long_about = None)]
struct Args {
    #[clap(flatten)]
    verbose: Verbosity<WarnLevel>,

    /// Number of evolutionary runs sharing the run scheduler
    #[arg(short = 'r', long, default_value_t = 4)]
    runs: usize,

    /// Number of evaluator slots per batch
    #[arg(short = 'k', long, default_value_t = 8)]
    pool_size: usize,

    /// Overrides the population size of the run configuration
    #[arg(short = 'p', long)]
    population_size: Option<usize>,

    #[arg(short = 'g', long)]
    max_generations: Option<u64>,

    #[arg(short = 't', long)]
    terminate_after: Option<String>,

    #[arg(long)]
    target_fitness: Option<f64>,

    /// Simulation ticks each candidate is observed for
    #[arg(long, default_value_t = 200)]
    ticks_per_trial: u32,

    /// YAML run configuration
    #[arg(short = 'c', long)]
    config_file: Option<PathBuf>,
}

/// Decodes `[kp, kd]` gains; negative or non-finite gains are not viable.
struct GainDecoder;

impl Decoder<RealVector> for GainDecoder {
    type Phenome = (f64, f64);

    fn decode(&self, genome: &RealVector) -> Option<(f64, f64)> {
        match genome.genes.as_slice() {
            [kp, kd] if kp.is_finite() && kd.is_finite() && *kp >= 0.0 && *kd >= 0.0 => {
                Some((*kp, *kd))
            }
            _ => None,
        }
    }
}

/// Drives a point mass towards the target and scores the mean squared error.
struct PointMassTrial {
    ticks_per_trial: u32,
    gains: (f64, f64),
    position: f64,
    velocity: f64,
    ticks_seen: u32,
    squared_error: f64,
}

impl PointMassTrial {
    fn new(ticks_per_trial: u32) -> Self {
        Self {
            ticks_per_trial,
            gains: (0.0, 0.0),
            position: 0.0,
            velocity: 0.0,
            ticks_seen: 0,
            squared_error: 0.0,
        }
    }
}

impl TickEvaluator<RealVector, (f64, f64)> for PointMassTrial {
    fn start(&mut self, phenome: (f64, f64), _candidate: &Candidate<RealVector>) {
        *self = Self {
            gains: phenome,
            ..Self::new(self.ticks_per_trial)
        };
    }

    fn evaluate_tick(&mut self, elapsed: f64) -> Result<Option<FitnessScore>, Error> {
        let (kp, kd) = self.gains;
        let error = TARGET_POSITION - self.position;
        let acceleration = kp * error - kd * self.velocity;

        self.velocity += acceleration * elapsed;
        self.position += self.velocity * elapsed;
        self.squared_error += error * error;
        self.ticks_seen += 1;

        if self.ticks_seen < self.ticks_per_trial {
            return Ok(None);
        }

        let mean_squared_error = self.squared_error / self.ticks_seen as f64;
        let fitness = if mean_squared_error.is_finite() {
            -mean_squared_error
        } else {
            f64::MIN
        };

        Ok(Some(FitnessScore::with_auxiliary(
            fitness,
            vec![self.position, self.velocity],
        )))
    }
}

fn init_logger(args: &Args) {
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .format_module_path(false)
        .format_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config_file {
        Some(config_file) => {
            let config_file_display = config_file.display();
            let config_ctx = |op| format!("Unable to {} config file: {}", op, &config_file_display);

            info!("Reading config file: {}", config_file_display);
            let config_str = fs::read_to_string(config_file).with_context(|| config_ctx("read"))?;
            RunConfig::from_yaml_str(&config_str).with_context(|| config_ctx("parse"))?
        }
        None => RunConfig::default(),
    };

    if let Some(population_size) = args.population_size {
        config.population_size = population_size;
        config.elite_count = config.elite_count.min(population_size.saturating_sub(1));
        config.validate().context("Invalid population size")?;
    }

    Ok(config)
}

fn assemble_termination_criteria(args: &Args) -> Result<Vec<TerminationCriterion>> {
    let mut termination_criteria = Vec::new();

    if let Some(terminate_after) = &args.terminate_after {
        let duration = parse(terminate_after).with_context(|| {
            format!("Unable to parse duration from value \"{}\"", terminate_after)
        })?;
        termination_criteria.push(TerminationCriterion::TerminateAfter(duration));
    }

    if let Some(target_fitness) = args.target_fitness {
        termination_criteria.push(TerminationCriterion::TargetFitness(target_fitness));
    }

    match args.max_generations {
        Some(max_generations) => {
            termination_criteria.push(TerminationCriterion::NumGenerations(max_generations))
        }
        None if termination_criteria.is_empty() => termination_criteria.push(
            TerminationCriterion::NumGenerations(DEFAULT_MAX_GENERATIONS),
        ),
        None => {}
    }

    Ok(termination_criteria)
}

fn make_scheduler(thread_name: &str) -> Result<Arc<Scheduler>> {
    let scheduler = Scheduler::new(SchedulerConfig {
        thread_name: thread_name.to_string(),
    })
    .with_context(|| format!("Unable to start scheduler {}", thread_name))?;

    Ok(Arc::new(scheduler))
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args);
    let config = load_config(&args)?;
    let termination_criteria = assemble_termination_criteria(&args)?;

    let run_scheduler = make_scheduler("lockstep-runs")?;
    let eval_scheduler = make_scheduler("lockstep-eval")?;

    let world_ticks = Arc::new(AtomicU64::new(0));

    let runs = (0..args.runs)
        .map(|index| {
            let world_ticks = world_ticks.clone();
            let ticks_per_trial = args.ticks_per_trial;

            let evaluator = BatchEvaluator::new(
                eval_scheduler.clone(),
                EvaluatorConfig::with_pool_size(args.pool_size),
                GainDecoder,
                move || {
                    world_ticks.fetch_add(1, Ordering::Relaxed);
                    Some(TICK_SECONDS)
                },
                move || PointMassTrial::new(ticks_per_trial),
            )?;

            let mut run_config = config.clone();
            run_config.seed = config.seed.wrapping_add(index as u64);

            GenerationalRun::new(
                run_scheduler.clone(),
                run_config,
                termination_criteria.clone(),
                vec![RealVector::new(vec![1.0, 1.0])],
                evaluator,
            )
        })
        .collect::<Result<Vec<_>, Error>>()
        .context("Unable to set up runs")?;

    let runs = Arc::new(runs);

    let runs_for_handler = runs.clone();
    ctrlc::set_handler(move || {
        info!("Received signal, pausing all runs");
        for run in runs_for_handler.iter() {
            run.request_pause().ok();
        }
    })
    .context("Unable to set signal handler")?;

    for run in runs.iter() {
        run.start()?;
    }

    for (index, run) in runs.iter().enumerate() {
        run.wait_until_paused()
            .with_context(|| format!("Run {} failed", index))?;
        let summary = run.summary();
        info!("Run {}:\n{}", index, summary);
        println!("{}", serde_json::to_string(&summary)?);
    }

    info!(
        "Done after {} simulation ticks",
        world_ticks.load(Ordering::Relaxed)
    );

    Ok(())
}
