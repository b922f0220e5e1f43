use crate::worker::{CompletionSender, Token, Worker};

pub(crate) struct Registration {
    pub worker: Box<dyn Worker>,
    pub completion: CompletionSender,
}

/// Registration change queued by any thread, consumed once by the scheduler
/// thread in enqueue order.
pub(crate) enum PendingOperation {
    Add(Registration),
    Remove(Token),
}
