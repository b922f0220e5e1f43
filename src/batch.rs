//! Bounded-pool, tick-driven batch evaluation.
//!
//! A batch of candidates is driven to completion by a single worker on a
//! shared scheduler. Every cycle the worker binds queued candidates to idle
//! evaluator slots, advances the external simulation by one tick, and lets
//! each busy slot observe that tick until it produces a fitness score.

use crate::algorithm::PopulationEvaluator;
use crate::candidate::{Candidate, FitnessScore};
use crate::error::Error;
use crate::meta::EvaluatorConfig;
use crate::scheduler::Scheduler;
use crate::worker::{Exit, Token, Worker, WorkerCompletion, WorkerFault};
use derivative::Derivative;
use futures::channel::oneshot;
use futures::future::{self, FutureExt};
use futures::{executor, pin_mut, select};
use futures_timer::Delay;
use itertools::Itertools;
use log::{debug, trace};
use serde::Serialize;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Turns a genome into its runnable form, or `None` if it is not viable.
pub trait Decoder<G>: Send + Sync + 'static {
    type Phenome: Send + 'static;

    fn decode(&self, genome: &G) -> Option<Self::Phenome>;
}

/// One reusable evaluator instance of the pool.
pub trait TickEvaluator<G, P>: Send + 'static {
    fn start(&mut self, phenome: P, candidate: &Candidate<G>);

    /// Observes one simulation tick. `None` means the evaluation continues.
    fn evaluate_tick(&mut self, elapsed: f64) -> Result<Option<FitnessScore>, Error>;
}

/// Advances the shared simulation by one tick and reports the elapsed
/// simulated time, if known.
pub trait TickSource: Send + Sync + 'static {
    fn advance(&self) -> Option<f64>;
}

impl<F> TickSource for F
where
    F: Fn() -> Option<f64> + Send + Sync + 'static,
{
    fn advance(&self) -> Option<f64> {
        self()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub num_candidates: usize,
    /// Candidates already holding a score, or listed more than once.
    pub num_skipped: usize,
    pub num_non_viable: usize,
    pub num_ticks: u64,
    pub simulated_time: f64,
    pub peak_busy: usize,
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct BatchEvaluator<G, D, S> {
    config: EvaluatorConfig,
    #[derivative(Debug = "ignore")]
    scheduler: Arc<Scheduler>,
    #[derivative(Debug = "ignore")]
    decoder: Arc<D>,
    #[derivative(Debug = "ignore")]
    tick_source: Arc<dyn TickSource>,
    #[derivative(Debug = "ignore")]
    slot_factory: Arc<dyn Fn() -> S + Send + Sync>,
    #[derivative(Debug = "ignore")]
    _genome: PhantomData<fn(G)>,
}

impl<G, D, S> BatchEvaluator<G, D, S>
where
    G: Send + Sync + 'static,
    D: Decoder<G>,
    S: TickEvaluator<G, D::Phenome>,
{
    /// `slot_factory` is called `pool_size` times per batch, so concurrent
    /// batches never share evaluator state.
    pub fn new<T, F>(
        scheduler: Arc<Scheduler>,
        config: EvaluatorConfig,
        decoder: D,
        tick_source: T,
        slot_factory: F,
    ) -> Result<Self, Error>
    where
        T: TickSource,
        F: Fn() -> S + Send + Sync + 'static,
    {
        if config.pool_size == 0 {
            return Err(Error::ZeroPoolSize);
        }

        Ok(Self {
            config,
            scheduler,
            decoder: Arc::new(decoder),
            tick_source: Arc::new(tick_source),
            slot_factory: Arc::new(slot_factory),
            _genome: PhantomData,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Blocks until every candidate holds a fitness score. Candidates that
    /// already hold one are left as they are.
    pub fn evaluate(&self, candidates: &[Arc<Candidate<G>>]) -> Result<BatchReport, Error> {
        self.block_on_batch(candidates, None)
    }

    /// Like `evaluate`, but gives up after `timeout`. Candidates evaluated so
    /// far keep their scores, so retrying the same batch only evaluates the
    /// rest.
    pub fn evaluate_with_timeout(
        &self,
        candidates: &[Arc<Candidate<G>>],
        timeout: Duration,
    ) -> Result<BatchReport, Error> {
        self.block_on_batch(candidates, Some(timeout))
    }

    pub async fn evaluate_async(
        &self,
        candidates: &[Arc<Candidate<G>>],
    ) -> Result<BatchReport, Error> {
        let submission = self.submit(candidates)?;
        self.wait_for(submission, None).await
    }

    fn block_on_batch(
        &self,
        candidates: &[Arc<Candidate<G>>],
        timeout: Option<Duration>,
    ) -> Result<BatchReport, Error> {
        if self.scheduler.is_scheduler_thread() {
            return Err(Error::BlockingOnSchedulerThread);
        }

        let submission = self.submit(candidates)?;
        executor::block_on(self.wait_for(submission, timeout))
    }

    fn submit(&self, candidates: &[Arc<Candidate<G>>]) -> Result<Submission, Error> {
        if candidates.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let queue: VecDeque<Arc<Candidate<G>>> = candidates
            .iter()
            .filter(|candidate| !candidate.is_evaluated())
            .unique_by(|candidate| candidate.id())
            .cloned()
            .collect();

        let (done_sender, done) = oneshot::channel::<BatchReport>();

        let slots = std::iter::repeat_with(|| EvaluatorSlot {
            evaluator: (self.slot_factory)(),
            bound: None,
        })
        .take(self.pool_size())
        .collect();

        let worker = BatchWorker {
            token: Token::next(),
            job: BatchJob {
                report: BatchReport {
                    num_candidates: candidates.len(),
                    num_skipped: candidates.len() - queue.len(),
                    ..BatchReport::default()
                },
                queue,
                slots,
                done: Some(done_sender),
            },
            decoder: self.decoder.clone(),
            tick_source: self.tick_source.clone(),
            default_elapsed: self.config.default_elapsed,
        };

        let token = worker.token;
        let completion = self.scheduler.add(worker)?;

        debug!(
            "Submitted batch of {} candidates as worker {} (pool size {})",
            candidates.len(),
            token,
            self.pool_size()
        );

        Ok(Submission {
            token,
            done,
            completion,
        })
    }

    async fn wait_for(
        &self,
        submission: Submission,
        timeout: Option<Duration>,
    ) -> Result<BatchReport, Error> {
        let Submission {
            token,
            mut done,
            completion,
        } = submission;

        let mut completion = completion.fuse();
        let deadline = match timeout {
            Some(timeout) => Delay::new(timeout).left_future(),
            None => future::pending::<()>().right_future(),
        }
        .fuse();
        pin_mut!(deadline);

        select! {
            report = &mut done => match report {
                Ok(report) => {
                    self.scheduler.remove(token).ok();
                    Ok(report)
                }
                Err(_) => Err(abandoned(completion.await)),
            },
            exit = &mut completion => match exit {
                Ok(Exit::Finished) => (&mut done).await.map_err(|_| Error::BatchAbandoned),
                exit => Err(abandoned(exit)),
            },
            () = deadline => {
                self.scheduler.remove(token).ok();
                let result = report_or_timeout(&mut done);
                if result.is_err() {
                    debug!("Batch worker {} timed out", token);
                }
                result
            },
        }
    }
}

/// A batch that completed in the same poll as its deadline still counts.
fn report_or_timeout(done: &mut oneshot::Receiver<BatchReport>) -> Result<BatchReport, Error> {
    match done.try_recv() {
        Ok(Some(report)) => Ok(report),
        _ => Err(Error::EvaluationTimedOut),
    }
}

fn abandoned(exit: Result<Exit, WorkerFault>) -> Error {
    match exit {
        Err(fault) => Error::WorkerFault(fault),
        Ok(_) => Error::BatchAbandoned,
    }
}

impl<G, D, S> PopulationEvaluator<G> for BatchEvaluator<G, D, S>
where
    G: Send + Sync + 'static,
    D: Decoder<G>,
    S: TickEvaluator<G, D::Phenome>,
{
    fn evaluate(&mut self, candidates: &[Arc<Candidate<G>>]) -> Result<(), Error> {
        BatchEvaluator::evaluate(self, candidates).map(|_| ())
    }
}

struct Submission {
    token: Token,
    done: oneshot::Receiver<BatchReport>,
    completion: WorkerCompletion,
}

struct EvaluatorSlot<G, S> {
    evaluator: S,
    bound: Option<Arc<Candidate<G>>>,
}

struct BatchJob<G, S> {
    queue: VecDeque<Arc<Candidate<G>>>,
    slots: Vec<EvaluatorSlot<G, S>>,
    report: BatchReport,
    done: Option<oneshot::Sender<BatchReport>>,
}

impl<G, S> BatchJob<G, S> {
    fn busy_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.bound.is_some()).count()
    }

    fn is_complete(&self) -> bool {
        self.queue.is_empty() && self.busy_count() == 0
    }

    fn signal_done(&mut self) {
        if let Some(done) = self.done.take() {
            done.send(self.report.clone()).ok();
        }
    }
}

struct BatchWorker<G, D, S> {
    token: Token,
    job: BatchJob<G, S>,
    decoder: Arc<D>,
    tick_source: Arc<dyn TickSource>,
    default_elapsed: f64,
}

impl<G, D, S> BatchWorker<G, D, S>
where
    D: Decoder<G>,
    S: TickEvaluator<G, D::Phenome>,
{
    fn assign(&mut self) -> Result<(), Error> {
        let job = &mut self.job;

        while let Some(slot) = job.slots.iter_mut().find(|slot| slot.bound.is_none()) {
            let candidate = match job.queue.pop_front() {
                Some(candidate) => candidate,
                None => break,
            };

            match self.decoder.decode(candidate.genome()) {
                Some(phenome) => {
                    slot.evaluator.start(phenome, &candidate);
                    slot.bound = Some(candidate);
                }
                None => {
                    trace!("Candidate {} is not viable", candidate.id());
                    candidate.set_fitness(FitnessScore::zero())?;
                    job.report.num_non_viable += 1;
                }
            }
        }

        job.report.peak_busy = job.report.peak_busy.max(job.busy_count());
        Ok(())
    }

    fn evaluate_busy(&mut self, elapsed: f64) -> Result<(), Error> {
        for slot in self.job.slots.iter_mut() {
            let candidate = match &slot.bound {
                Some(candidate) => candidate,
                None => continue,
            };

            if let Some(fitness) = slot.evaluator.evaluate_tick(elapsed)? {
                trace!(
                    "Candidate {} evaluated, fitness {}",
                    candidate.id(),
                    fitness.primary
                );
                candidate.set_fitness(fitness)?;
                slot.bound = None;
            }
        }

        Ok(())
    }
}

impl<G, D, S> Worker for BatchWorker<G, D, S>
where
    G: Send + Sync + 'static,
    D: Decoder<G>,
    S: TickEvaluator<G, D::Phenome>,
{
    fn token(&self) -> Token {
        self.token
    }

    fn step(&mut self) -> Result<bool, Error> {
        self.assign()?;

        if self.job.busy_count() > 0 {
            let elapsed = self.tick_source.advance().unwrap_or(self.default_elapsed);
            self.job.report.num_ticks += 1;
            self.job.report.simulated_time += elapsed;
            self.evaluate_busy(elapsed)?;
        }

        if self.job.is_complete() {
            self.job.signal_done();
            Ok(false)
        } else {
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;

    struct Viable;

    impl Decoder<u32> for Viable {
        type Phenome = u32;

        fn decode(&self, genome: &u32) -> Option<u32> {
            Some(*genome)
        }
    }

    /// Finishes after as many ticks as the phenome says.
    #[derive(Default)]
    struct Countdown {
        remaining: u32,
    }

    impl TickEvaluator<u32, u32> for Countdown {
        fn start(&mut self, phenome: u32, _candidate: &Candidate<u32>) {
            self.remaining = phenome;
        }

        fn evaluate_tick(&mut self, _elapsed: f64) -> Result<Option<FitnessScore>, Error> {
            self.remaining -= 1;
            Ok((self.remaining == 0).then(FitnessScore::zero))
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        Arc::new(Scheduler::new(SchedulerConfig::default()).unwrap())
    }

    #[test]
    fn zero_pool_size_rejected() {
        let result = BatchEvaluator::<u32, _, _>::new(
            scheduler(),
            EvaluatorConfig::with_pool_size(0),
            Viable,
            || None::<f64>,
            Countdown::default,
        );
        assert!(matches!(result, Err(Error::ZeroPoolSize)));
    }

    #[test]
    fn empty_batch_rejected() {
        let evaluator = BatchEvaluator::<u32, _, _>::new(
            scheduler(),
            EvaluatorConfig::with_pool_size(1),
            Viable,
            || None::<f64>,
            Countdown::default,
        )
        .unwrap();

        assert!(matches!(evaluator.evaluate(&[]), Err(Error::EmptyBatch)));
    }

    #[test]
    fn default_elapsed_used_when_source_reports_none() {
        let evaluator = BatchEvaluator::<u32, _, _>::new(
            scheduler(),
            EvaluatorConfig {
                pool_size: 1,
                default_elapsed: 0.25,
            },
            Viable,
            || None::<f64>,
            Countdown::default,
        )
        .unwrap();

        let candidates = vec![Arc::new(Candidate::new(0, 4))];
        let report = evaluator.evaluate(&candidates).unwrap();

        assert_eq!(report.num_ticks, 4);
        assert_eq!(report.simulated_time, 1.0);
    }

    #[test]
    fn finished_batch_wins_over_simultaneous_deadline() {
        let (sender, mut done) = oneshot::channel::<BatchReport>();
        let report = BatchReport {
            num_candidates: 2,
            num_ticks: 3,
            ..BatchReport::default()
        };
        sender.send(report.clone()).unwrap();

        assert_eq!(report_or_timeout(&mut done).unwrap(), report);
    }

    #[test]
    fn pending_batch_at_deadline_times_out() {
        let (_sender, mut done) = oneshot::channel::<BatchReport>();

        assert!(matches!(
            report_or_timeout(&mut done),
            Err(Error::EvaluationTimedOut)
        ));
    }
}
