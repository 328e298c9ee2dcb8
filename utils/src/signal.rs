//! Mechanisms for coordinating shutdown across many tasks.

use futures::{channel::oneshot, future::Shared, FutureExt};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// A one-time broadcast that can be awaited by many tasks.
///
/// To avoid cloning in hot loops, wait on a reference to it (`&mut signal`)
/// and do not poll it again once it has resolved.
///
/// # Example
///
/// ```rust
/// use beacon_utils::signal::Signaler;
/// use futures::executor::block_on;
///
/// let (signaler, signal) = Signaler::new();
/// signaler.signal(2);
/// assert_eq!(block_on(signal), 2);
/// ```
#[derive(Clone)]
pub struct Signal {
    inner: Shared<oneshot::Receiver<i32>>,
}

impl Future for Signal {
    type Output = i32;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped signaler is treated as a shutdown request
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|value| value.unwrap_or(0))
    }
}

impl Signal {
    /// Returns the signalled value, if the signal has already resolved.
    pub fn peek(&self) -> Option<i32> {
        match self.inner.peek() {
            Some(Ok(value)) => Some(*value),
            Some(Err(_)) => Some(0),
            None => None,
        }
    }
}

/// Coordinates a one-time signal across many tasks.
pub struct Signaler {
    tx: oneshot::Sender<i32>,
}

impl Signaler {
    /// Create a new [Signaler].
    ///
    /// Returns a [Signaler] and a [Signal] that will resolve when [Signaler::signal] is called.
    pub fn new() -> (Self, Signal) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, Signal { inner: rx.shared() })
    }

    /// Resolve all [Signal]s associated with this [Signaler].
    pub fn signal(self, value: i32) {
        let _ = self.tx.send(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{executor::block_on, future::join_all};

    #[test]
    fn test_signal_many_waiters() {
        let (signaler, signal) = Signaler::new();
        let waiters: Vec<_> = (0..4).map(|_| signal.clone()).collect();
        assert_eq!(signal.peek(), None);
        signaler.signal(9);
        assert_eq!(block_on(join_all(waiters)), vec![9; 4]);
        assert_eq!(signal.peek(), Some(9));
    }

    #[test]
    fn test_dropped_signaler() {
        let (signaler, signal) = Signaler::new();
        drop(signaler);
        assert_eq!(block_on(signal), 0);
    }
}
