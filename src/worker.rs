//! The contract every cooperative task fulfils, and the channel through which
//! the scheduler reports how a task left it.

use crate::error::Error;
use futures::channel::oneshot;
use futures::executor;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a worker, used only to match `remove` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A unit of cooperative, resumable work.
///
/// `step` must return quickly: every worker registered on a scheduler shares
/// its single thread, so a slow step starves all of its peers.
pub trait Worker: Send + 'static {
    /// Assigned once at construction and never changed.
    fn token(&self) -> Token;

    /// Advances the work by one increment. `Ok(true)` asks to be stepped again
    /// next cycle, `Ok(false)` reports completion. An error (or a panic) is a
    /// fault: the worker is dropped and the fault reported to its registrant.
    fn step(&mut self) -> Result<bool, Error>;
}

/// Why a worker stopped being stepped without faulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Finished,
    Removed,
    Shutdown,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("worker {token} faulted: {message}")]
pub struct WorkerFault {
    pub token: Token,
    pub message: String,
}

impl WorkerFault {
    pub fn new(token: Token, message: impl Into<String>) -> Self {
        Self {
            token,
            message: message.into(),
        }
    }
}

pub(crate) type CompletionSender = oneshot::Sender<Result<Exit, WorkerFault>>;

/// Resolves once the scheduler has let go of the worker it was issued for.
#[must_use = "dropping the completion discards any fault the worker reports"]
pub struct WorkerCompletion {
    token: Token,
    receiver: oneshot::Receiver<Result<Exit, WorkerFault>>,
}

impl WorkerCompletion {
    pub(crate) fn new(token: Token) -> (CompletionSender, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { token, receiver })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Blocks the calling thread until the worker exits.
    pub fn wait(self) -> Result<Exit, WorkerFault> {
        executor::block_on(self)
    }
}

impl Future for WorkerCompletion {
    type Output = Result<Exit, WorkerFault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let token = self.token;
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(WorkerFault::new(
                    token,
                    "scheduler dropped the worker without reporting an exit",
                ))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique() {
        let a = Token::next();
        let b = Token::next();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn completion_reports_sent_exit() {
        let token = Token::next();
        let (sender, completion) = WorkerCompletion::new(token);
        sender.send(Ok(Exit::Removed)).unwrap();
        assert_eq!(completion.wait(), Ok(Exit::Removed));
    }

    #[test]
    fn dropped_sender_is_a_fault() {
        let token = Token::next();
        let (sender, completion) = WorkerCompletion::new(token);
        drop(sender);
        let fault = completion.wait().unwrap_err();
        assert_eq!(fault.token, token);
    }
}
