//! Single-thread round-robin scheduler for cooperative workers.
//!
//! Each scheduler owns one dedicated thread. A cycle drains pending
//! registration changes, then steps every active worker once in insertion
//! order. With nothing to step, the thread parks on the pending-operation
//! channel until something is queued or the scheduler shuts down.

use crate::error::Error;
use crate::event::{PendingOperation, Registration};
use crate::worker::{Exit, Token, Worker, WorkerCompletion, WorkerFault};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::executor;
use futures::StreamExt;
use log::{debug, trace, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "lockstep-scheduler".to_string(),
        }
    }
}

#[derive(Default)]
struct Shared {
    stop: AtomicBool,
    cycles: AtomicU64,
}

pub struct Scheduler {
    op_sender: UnboundedSender<PendingOperation>,
    shared: Arc<Shared>,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns the scheduler thread. It runs until `shutdown` or drop.
    pub fn new(config: SchedulerConfig) -> Result<Self, Error> {
        let (op_sender, op_recv) = mpsc::unbounded::<PendingOperation>();
        let shared = Arc::new(Shared::default());

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_loop(op_recv, thread_shared))?;

        debug!("Started scheduler thread {:?}", config.thread_name);

        Ok(Self {
            op_sender,
            shared,
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Queues `worker` for registration. It is stepped from the next drain on.
    pub fn add<W: Worker>(&self, worker: W) -> Result<WorkerCompletion, Error> {
        let token = worker.token();
        let (completion_sender, completion) = WorkerCompletion::new(token);

        self.op_sender
            .unbounded_send(PendingOperation::Add(Registration {
                worker: Box::new(worker),
                completion: completion_sender,
            }))
            .map_err(|_| Error::SchedulerShutDown)?;

        trace!("Queued worker {} for registration", token);
        Ok(completion)
    }

    /// Queues removal of every active worker carrying `token`. Removing an
    /// unknown token is a no-op.
    pub fn remove(&self, token: Token) -> Result<(), Error> {
        self.op_sender
            .unbounded_send(PendingOperation::Remove(token))
            .map_err(|_| Error::SchedulerShutDown)?;

        trace!("Queued worker {} for removal", token);
        Ok(())
    }

    /// Number of completed step passes over a non-empty active list.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    pub fn is_scheduler_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// Requests cooperative shutdown and joins the thread. The current pass
    /// completes first; workers still registered exit with `Exit::Shutdown`.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.shared.stop.store(true, Ordering::Release);
        self.op_sender.close_channel();

        if self.is_scheduler_thread() {
            return Ok(());
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) => handle.join().map_err(|_| Error::SchedulerThreadPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("Scheduler shutdown failed: {}", err);
        }
    }
}

struct ActiveWorker {
    token: Token,
    worker: Box<dyn Worker>,
    completion: Option<crate::worker::CompletionSender>,
}

impl ActiveWorker {
    fn new(registration: Registration) -> Self {
        Self {
            token: registration.worker.token(),
            worker: registration.worker,
            completion: Some(registration.completion),
        }
    }

    fn report(&mut self, outcome: Result<Exit, WorkerFault>) {
        if let Some(sender) = self.completion.take() {
            sender.send(outcome).ok();
        }
    }

    /// Returns the exit outcome once the worker is done.
    fn step(&mut self) -> Option<Result<Exit, WorkerFault>> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.worker.step())) {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some(Ok(Exit::Finished)),
            Ok(Err(err)) => Some(Err(WorkerFault::new(self.token, err.to_string()))),
            Err(payload) => Some(Err(WorkerFault::new(
                self.token,
                panic_message(payload.as_ref()),
            ))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

fn apply(op: PendingOperation, active: &mut Vec<ActiveWorker>) {
    match op {
        PendingOperation::Add(registration) => {
            let entry = ActiveWorker::new(registration);
            trace!("Registered worker {}", entry.token);
            active.push(entry);
        }
        PendingOperation::Remove(token) => active.retain_mut(|entry| {
            if entry.token == token {
                trace!("Removed worker {}", token);
                entry.report(Ok(Exit::Removed));
                false
            } else {
                true
            }
        }),
    }
}

fn drain(op_recv: &mut UnboundedReceiver<PendingOperation>, active: &mut Vec<ActiveWorker>) {
    while let Ok(op) = op_recv.try_recv() {
        apply(op, active);
    }
}

fn run_loop(mut op_recv: UnboundedReceiver<PendingOperation>, shared: Arc<Shared>) {
    let mut active: Vec<ActiveWorker> = Vec::new();

    while !shared.stop.load(Ordering::Acquire) {
        drain(&mut op_recv, &mut active);

        if active.is_empty() {
            match executor::block_on(op_recv.next()) {
                Some(op) => apply(op, &mut active),
                None => break,
            }
            continue;
        }

        active.retain_mut(|entry| match entry.step() {
            None => true,
            Some(outcome) => {
                match &outcome {
                    Ok(_) => trace!("Worker {} finished", entry.token),
                    Err(fault) => warn!("Dropping worker: {}", fault),
                }
                entry.report(outcome);
                false
            }
        });

        shared.cycles.fetch_add(1, Ordering::Relaxed);
    }

    op_recv.close();
    drain(&mut op_recv, &mut active);
    for mut entry in active {
        entry.report(Ok(Exit::Shutdown));
    }

    debug!("Scheduler thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Countdown {
        token: Token,
        remaining: usize,
        steps: Arc<AtomicUsize>,
    }

    impl Countdown {
        fn new(remaining: usize) -> (Self, Arc<AtomicUsize>) {
            let steps = Arc::new(AtomicUsize::new(0));
            let worker = Self {
                token: Token::next(),
                remaining,
                steps: steps.clone(),
            };
            (worker, steps)
        }
    }

    impl Worker for Countdown {
        fn token(&self) -> Token {
            self.token
        }

        fn step(&mut self) -> Result<bool, Error> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            self.remaining -= 1;
            Ok(self.remaining > 0)
        }
    }

    #[test]
    fn finished_worker_reports_exit() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let (worker, steps) = Countdown::new(3);

        let completion = scheduler.add(worker).unwrap();

        assert_eq!(completion.wait(), Ok(Exit::Finished));
        assert_eq!(steps.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panic_is_reported_as_fault() {
        struct Panicking(Token);

        impl Worker for Panicking {
            fn token(&self) -> Token {
                self.0
            }

            fn step(&mut self) -> Result<bool, Error> {
                panic!("boom");
            }
        }

        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let token = Token::next();
        let fault = scheduler.add(Panicking(token)).unwrap().wait().unwrap_err();

        assert_eq!(fault.token, token);
        assert!(fault.message.contains("boom"));
    }

    #[test]
    fn add_after_shutdown_fails() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        scheduler.shutdown().unwrap();
        scheduler.shutdown().unwrap();

        let (worker, _) = Countdown::new(1);
        assert!(matches!(
            scheduler.add(worker),
            Err(Error::SchedulerShutDown)
        ));
    }

    #[test]
    fn idle_scheduler_does_not_cycle() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(scheduler.cycles(), 0);
    }
}
