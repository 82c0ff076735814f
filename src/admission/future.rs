use super::controller::{Rejection, Shared, SlotToken};
use futures::ready;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Continuation held by a queued caller.
///
/// Resolves to a [`SlotToken`] once the caller is released, or to
/// [`Rejection::ShuttingDown`] when shutdown begins first. Dropping it
/// gives up the caller's place in the queue.
#[derive(Debug)]
#[must_use = "dropping a `Deferred` gives up its place in the queue"]
pub struct Deferred {
    rx: oneshot::Receiver<Result<SlotToken, Rejection>>,
    shared: Arc<Shared>,
    done: bool,
}

impl Deferred {
    pub(super) fn new(
        rx: oneshot::Receiver<Result<SlotToken, Rejection>>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            rx,
            shared,
            done: false,
        }
    }
}

impl Future for Deferred {
    type Output = Result<SlotToken, Rejection>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The sending side only goes away without a message when the
        // controller itself was torn down.
        let released = ready!(Pin::new(&mut self.rx).poll(cx));
        self.done = true;
        Poll::Ready(released.unwrap_or(Err(Rejection::ShuttingDown)))
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.rx.close();
        // Released or rejected before anyone polled; a token dropped here
        // completes its slot.
        if self.rx.try_recv().is_err() {
            self.shared.cancel();
        }
    }
}
