//! Cooperative round-robin scheduling for many long-lived evolutionary runs,
//! and bounded-pool, tick-driven batch fitness evaluation built on top of it.
//!
//! All workers of a [`scheduler::Scheduler`] run sequentially on its one
//! dedicated thread. [`batch::BatchEvaluator`] drives a batch of candidates
//! through a fixed number of reusable evaluator slots, advancing a shared
//! simulation one tick per cycle. [`run::GenerationalRun`] advances one
//! evolutionary run by one generation per cycle.

pub mod algorithm;
pub mod batch;
pub mod candidate;
pub mod error;
mod event;
pub mod genome;
pub mod message;
pub mod meta;
pub mod result;
pub mod run;
pub mod scheduler;
pub mod selection;
pub mod termination;
pub mod worker;
