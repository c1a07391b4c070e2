use std::future::{pending, Future};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// The single retransmission timer of a send window.
///
/// This is a plain deadline owned by the window actor rather than a free-running task. Arming
///  replaces the previous deadline, and cancelling clears it, so there can never be two live
///  alarms for the same window. Expiry is observed through [RetransmitTimer::expiry] inside the
///  actor's event loop, which means that a firing can not race against a cancellation: both
///  happen on the same task, one after the other.
#[derive(Debug)]
pub struct RetransmitTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new(delay: Duration) -> RetransmitTimer {
        RetransmitTimer {
            delay,
            deadline: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// (Re-)arm the timer to fire one delay from now, discarding any pending deadline
    pub fn arm(&mut self) {
        let deadline = Instant::now() + self.delay;
        trace!("arming retransmission timer for {:?}", self.delay);
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) {
        if self.deadline.take().is_some() {
            trace!("cancelled retransmission timer");
        }
    }

    /// A future that completes when the currently pending deadline is reached, and never if the
    ///  timer is disarmed. The future does not borrow the timer, so it is a snapshot: callers
    ///  must re-create it after arming or cancelling.
    pub fn expiry(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        }
    }
}
