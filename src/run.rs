//! One evolutionary run expressed as a cooperative worker: each step is one
//! generation, so many runs can share a single scheduler thread.
//!
//! ```text
//!   Ready --start--> Running --pause request / stop condition--> Paused
//!                       ^                                          |
//!                       +------------------resume------------------+
//! ```
//!
//! Pause requests are eventually consistent: the flag is checked once per
//! generation, after the generation completes, so a generation in flight
//! always finishes first.

use crate::algorithm::{AlgoContext, PopulationEvaluator};
use crate::error::Error;
use crate::genome::Genome;
use crate::message::{PauseReason, RunEvent, RunProgress};
use crate::meta::{RunConfig, UpdateScheme};
use crate::result::{BestSeen, RunSummary};
use crate::scheduler::Scheduler;
use crate::termination::{self, StopCondition, TerminationCriterion};
use crate::worker::{Exit, Token, Worker, WorkerCompletion};
use async_broadcast::{InactiveReceiver, Receiver, Sender};
use enum_display_derive::Display;
use futures::executor;
use futures::future::{FutureExt, Shared};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Ready,
    Running,
    Paused,
}

struct RunCore<G> {
    algo: AlgoContext<G>,
    evaluator: Box<dyn PopulationEvaluator<G>>,
    stop_condition: StopCondition,
    update_scheme: UpdateScheme,
    last_update: (u64, Instant),
}

impl<G: Genome> RunCore<G> {
    fn update_due(&self, generation: u64) -> bool {
        let (last_generation, last_instant) = self.last_update;
        match self.update_scheme {
            UpdateScheme::Generations(every) => generation - last_generation >= every,
            UpdateScheme::Interval(interval) => last_instant.elapsed() >= interval,
        }
    }
}

struct RunShared<G> {
    scheduler: Arc<Scheduler>,
    state: Mutex<RunState>,
    pause_requested: AtomicBool,
    generation: AtomicU64,
    running_since: Mutex<Instant>,
    core: Mutex<RunCore<G>>,
    events: Sender<RunEvent>,
    events_keepalive: InactiveReceiver<RunEvent>,
    completion: Mutex<Option<Shared<WorkerCompletion>>>,
}

/// Lock order: `core` before `state`. `running_since` and `completion` are
/// leaves and never held while taking another lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<G> RunShared<G> {
    fn publish(&self, event: RunEvent) {
        // Overflow mode drops the oldest event instead of blocking.
        self.events.try_broadcast(event).ok();
    }
}

struct RunWorker<G> {
    token: Token,
    shared: Arc<RunShared<G>>,
    launch_event: Option<RunEvent>,
}

impl<G: Genome> Worker for RunWorker<G> {
    fn token(&self) -> Token {
        self.token
    }

    fn step(&mut self) -> Result<bool, Error> {
        let shared = &self.shared;

        if let Some(event) = self.launch_event.take() {
            shared.publish(event);
        }

        let mut guard = lock(&shared.core);
        let core = &mut *guard;

        let generation = shared.generation.load(Ordering::SeqCst) + 1;

        let stats = match core.algo.advance(core.evaluator.as_mut()) {
            Ok(stats) => stats,
            Err(err) => {
                warn!("Generation {} failed: {}", generation, err);
                shared.publish(RunEvent::Faulted {
                    generation,
                    message: err.to_string(),
                });
                return Err(err);
            }
        };
        shared.generation.store(generation, Ordering::SeqCst);

        let best_seen_fitness = core.algo.peek_best_seen_fitness();
        let running_since = *lock(&shared.running_since);

        if core.update_due(generation) {
            core.last_update = (generation, Instant::now());
            shared.publish(RunEvent::Progress(RunProgress {
                generation,
                best_fitness: stats.best_fitness,
                mean_fitness: stats.mean_fitness,
                best_seen_fitness: best_seen_fitness.unwrap_or(stats.best_fitness),
            }));
        }

        let reason = if shared.pause_requested.swap(false, Ordering::SeqCst) {
            Some(PauseReason::Requested)
        } else if core
            .stop_condition
            .is_satisfied(generation, best_seen_fitness, running_since)
        {
            Some(PauseReason::StopCondition)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                *lock(&shared.state) = RunState::Paused;
                info!("Run paused after generation {} ({:?})", generation, reason);
                shared.publish(RunEvent::Paused { generation, reason });
                Ok(false)
            }
            None => Ok(true),
        }
    }
}

/// Handle to one evolutionary run registered on a scheduler.
pub struct GenerationalRun<G> {
    shared: Arc<RunShared<G>>,
}

impl<G: Genome> GenerationalRun<G> {
    pub fn new<E, T>(
        scheduler: Arc<Scheduler>,
        config: RunConfig,
        termination_criteria: T,
        seeds: Vec<G>,
        evaluator: E,
    ) -> Result<Self, Error>
    where
        E: PopulationEvaluator<G>,
        T: IntoIterator<Item = TerminationCriterion>,
    {
        let stop_condition = termination::compile(termination_criteria)?;
        let update_scheme = config.update_scheme.clone();
        let algo = AlgoContext::new(config, seeds)?;

        let (mut events, events_recv) = async_broadcast::broadcast(EVENT_CAPACITY);
        events.set_overflow(true);

        let now = Instant::now();

        Ok(Self {
            shared: Arc::new(RunShared {
                scheduler,
                state: Mutex::new(RunState::Ready),
                pause_requested: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                running_since: Mutex::new(now),
                core: Mutex::new(RunCore {
                    algo,
                    evaluator: Box::new(evaluator),
                    stop_condition,
                    update_scheme,
                    last_update: (0, now),
                }),
                events,
                events_keepalive: events_recv.deactivate(),
                completion: Mutex::new(None),
            }),
        })
    }

    /// Ready -> Running.
    pub fn start(&self) -> Result<(), Error> {
        self.launch(RunState::Ready, RunEvent::Started)
    }

    /// Paused -> Running, re-registering the run with its scheduler.
    pub fn resume(&self) -> Result<(), Error> {
        let generation = self.generation();
        self.launch(RunState::Paused, RunEvent::Resumed { generation })
    }

    fn launch(&self, expected: RunState, event: RunEvent) -> Result<(), Error> {
        let mut state = lock(&self.shared.state);
        if *state != expected {
            return Err(Error::InvalidRunState {
                expected,
                actual: *state,
            });
        }

        self.shared.pause_requested.store(false, Ordering::SeqCst);
        *lock(&self.shared.running_since) = Instant::now();

        let worker = RunWorker {
            token: Token::next(),
            shared: self.shared.clone(),
            launch_event: Some(event),
        };
        let token = worker.token;
        let completion = self.shared.scheduler.add(worker)?;

        *lock(&self.shared.completion) = Some(completion.shared());
        *state = RunState::Running;
        drop(state);

        debug!("Run registered as worker {}", token);
        Ok(())
    }

    /// Asks a running run to pause at the end of its current generation.
    pub fn request_pause(&self) -> Result<(), Error> {
        let state = lock(&self.shared.state);
        if *state != RunState::Running {
            return Err(Error::InvalidRunState {
                expected: RunState::Running,
                actual: *state,
            });
        }

        self.shared.pause_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Blocks until the run pauses. Any number of threads may wait at once.
    /// A generation that fails is reported here instead of as a pause.
    pub fn wait_until_paused(&self) -> Result<(), Error> {
        if self.shared.scheduler.is_scheduler_thread() {
            return Err(Error::BlockingOnSchedulerThread);
        }

        let completion = lock(&self.shared.completion).clone();

        match completion {
            Some(completion) => match executor::block_on(completion) {
                Ok(Exit::Finished) => Ok(()),
                Ok(Exit::Removed) | Ok(Exit::Shutdown) => Err(Error::SchedulerShutDown),
                Err(fault) => Err(fault.into()),
            },
            None => Err(Error::InvalidRunState {
                expected: RunState::Running,
                actual: self.state(),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        *lock(&self.shared.state)
    }

    /// Number of generations completed so far.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Receives events published from now on. A slow subscriber loses the
    /// oldest events rather than stalling the run.
    pub fn subscribe(&self) -> Receiver<RunEvent> {
        self.shared.events_keepalive.activate_cloned()
    }

    /// Waits for the generation in flight, if any, to finish.
    pub fn summary(&self) -> RunSummary<G> {
        let core = lock(&self.shared.core);

        let best_seen = core.algo.best_seen().and_then(|candidate| {
            candidate.fitness().map(|fitness| BestSeen {
                candidate_id: candidate.id(),
                fitness: fitness.clone(),
                genome: candidate.genome().clone(),
            })
        });

        RunSummary {
            state: self.state(),
            generation: self.generation(),
            best_seen,
        }
    }
}
