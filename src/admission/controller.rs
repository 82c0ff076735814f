use super::future::Deferred;
use crate::internal_events::{
    AbandonedSlotCompleted, AdmissionLimitChanged, QueuedRequestCancelled, RequestAdmitted,
    RequestDeferred, RequestRejected, RequestReleased, ShutdownCompleted, ShutdownStarted,
    SlotCompleted, UnmatchedSlotCompletion,
};
use snafu::{ensure, Snafu};
use std::collections::VecDeque;
use std::fmt;
use std::mem::replace;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
pub enum AdmissionError {
    #[snafu(display("Invalid concurrency limit {}, must be at least 1.", limit))]
    InvalidLimit { limit: usize },
}

/// Why a caller was refused a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Shutdown has begun; no further work is admitted.
    ShuttingDown,
}

impl Rejection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Rejection::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ShuttingDown => write!(f, "Server is shutting down."),
        }
    }
}

impl std::error::Error for Rejection {}

/// How a shutdown finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every active slot completed before the timeout.
    Graceful,
    /// The timeout elapsed first and the remaining slots were abandoned.
    Forced { abandoned: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped(ShutdownOutcome),
}

/// Point-in-time view of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub limit: usize,
    pub active: usize,
    pub queued: usize,
    pub phase: Phase,
}

/// Outcome of [`Controller::try_admit`].
#[derive(Debug)]
pub enum Verdict {
    /// A slot was granted. It is returned when the token is completed or dropped.
    Admitted(SlotToken),
    /// All slots are busy. `deferred` resolves once the caller reaches the
    /// head of the queue and a slot frees up, or when shutdown begins.
    Queued { position: usize, deferred: Deferred },
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted(_))
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Verdict::Queued { .. })
    }
}

/// Admission controller capping the number of concurrently active slots.
///
/// Cloning is cheap; every clone shares the same counters, queue and
/// shutdown state.
#[derive(Clone, Debug)]
pub struct Controller {
    shared: Arc<Shared>,
}

#[derive(Debug)]
pub(super) struct Shared {
    inner: Mutex<Inner>,
    phase_tx: watch::Sender<Phase>,
    // Held so the channel stays open for as long as the controller lives.
    phase_rx: watch::Receiver<Phase>,
}

#[derive(Debug)]
struct Inner {
    limit: usize,
    active: usize,
    queue: VecDeque<Waiter>,
    phase: Phase,
    // Bumped when a forced shutdown abandons the active slots.
    generation: u64,
}

#[derive(Debug)]
struct Waiter {
    tx: oneshot::Sender<Result<SlotToken, Rejection>>,
    queued_at: Instant,
}

type Released = Vec<(Waiter, Result<SlotToken, Rejection>)>;

impl Inner {
    /// Queued callers that still hold their `Deferred`.
    fn queued(&self) -> usize {
        self.queue
            .iter()
            .filter(|waiter| !waiter.tx.is_closed())
            .count()
    }
}

impl Controller {
    pub fn new(limit: usize) -> Result<Self, AdmissionError> {
        ensure!(limit > 0, InvalidLimit { limit });
        let (phase_tx, phase_rx) = watch::channel(Phase::Running);
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    limit,
                    active: 0,
                    queue: VecDeque::new(),
                    phase: Phase::Running,
                    generation: 0,
                }),
                phase_tx,
                phase_rx,
            }),
        })
    }

    /// Decides whether the caller may start work now, has to wait, or is
    /// refused outright.
    pub fn try_admit(&self) -> Verdict {
        let mut inner = self.shared.lock();
        if inner.phase != Phase::Running {
            drop(inner);
            emit!(RequestRejected {
                reason: Rejection::ShuttingDown
            });
            return Verdict::Rejected(Rejection::ShuttingDown);
        }

        if inner.active < inner.limit {
            let token = self.shared.issue(&mut inner);
            let (active, limit) = (inner.active, inner.limit);
            drop(inner);
            emit!(RequestAdmitted { active, limit });
            Verdict::Admitted(token)
        } else {
            let (tx, rx) = oneshot::channel();
            inner.queue.retain(|waiter| !waiter.tx.is_closed());
            inner.queue.push_back(Waiter {
                tx,
                queued_at: Instant::now(),
            });
            let (position, active) = (inner.queue.len(), inner.active);
            drop(inner);
            emit!(RequestDeferred { position, active });
            Verdict::Queued {
                position,
                deferred: Deferred::new(rx, Arc::clone(&self.shared)),
            }
        }
    }

    /// Replaces the limit. Raising it releases queued callers right away;
    /// lowering it never touches slots that are already active.
    pub fn set_limit(&self, limit: usize) -> Result<(), AdmissionError> {
        ensure!(limit > 0, InvalidLimit { limit });
        let (old, active, queued, released) = {
            let mut inner = self.shared.lock();
            let old = replace(&mut inner.limit, limit);
            let released = self.shared.release_next(&mut inner);
            (old, inner.active, inner.queued(), released)
        };
        emit!(AdmissionLimitChanged {
            old,
            new: limit,
            active,
            queued,
        });
        Shared::dispatch(released);
        Ok(())
    }

    /// Stops admitting work, tells every queued caller about it and waits
    /// for the active slots to complete. If they are still busy after
    /// `force_timeout` they are abandoned.
    ///
    /// Calling this again once shutdown has begun repeats none of the
    /// above. It returns the stored outcome, or waits for the first call
    /// to reach one, and `force_timeout` is ignored.
    pub async fn begin_shutdown(&self, force_timeout: Duration) -> ShutdownOutcome {
        let started = Instant::now();
        let mut phase = self.shared.phase_rx.clone();

        let initiated = {
            let mut inner = self.shared.lock();
            if inner.phase == Phase::Running {
                self.shared.transition(&mut inner, Phase::Draining);
                let released = self.shared.release_next(&mut inner);
                let active = inner.active;
                self.shared.settle(&mut inner);
                Some((active, released))
            } else {
                None
            }
        };

        let (active, released) = match initiated {
            Some(initiated) => initiated,
            // The first call owns the drain and its deadline.
            None => return wait_for_stop(&mut phase).await,
        };
        emit!(ShutdownStarted {
            active,
            queued: released.len(),
        });
        Shared::dispatch(released);

        let outcome = match timeout(force_timeout, wait_for_stop(&mut phase)).await {
            Ok(outcome) => outcome,
            Err(_) => self.shared.force_stop(),
        };

        emit!(ShutdownCompleted {
            outcome,
            elapsed: started.elapsed(),
        });
        outcome
    }

    pub fn stats(&self) -> Stats {
        let inner = self.shared.lock();
        Stats {
            limit: inner.limit,
            active: inner.active,
            queued: inner.queued(),
            phase: inner.phase,
        }
    }

    pub fn limit(&self) -> usize {
        self.shared.lock().limit
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("Controller mutex is poisoned")
    }

    fn issue(self: &Arc<Self>, inner: &mut Inner) -> SlotToken {
        inner.active += 1;
        SlotToken {
            shared: Arc::clone(self),
            generation: inner.generation,
        }
    }

    /// Hands free slots to queued callers in arrival order. While shutting
    /// down, every queued caller is rejected instead.
    ///
    /// The returned continuations must be dispatched after the lock is
    /// released.
    fn release_next(self: &Arc<Self>, inner: &mut Inner) -> Released {
        let mut released = Vec::new();
        if inner.phase != Phase::Running {
            released.extend(
                inner
                    .queue
                    .drain(..)
                    .map(|waiter| (waiter, Err(Rejection::ShuttingDown))),
            );
            return released;
        }

        while inner.active < inner.limit {
            let waiter = match inner.queue.pop_front() {
                Some(waiter) => waiter,
                None => break,
            };
            // The caller dropped its `Deferred` while waiting.
            if waiter.tx.is_closed() {
                continue;
            }
            let token = self.issue(inner);
            released.push((waiter, Ok(token)));
        }
        released
    }

    fn dispatch(released: Released) {
        for (waiter, message) in released {
            match &message {
                Ok(_) => emit!(RequestReleased {
                    waited: waiter.queued_at.elapsed()
                }),
                Err(reason) => emit!(RequestRejected { reason: *reason }),
            }
            // If the caller went away in the meantime the token comes back
            // here and dropping it frees the slot again.
            let _ = waiter.tx.send(message);
        }
    }

    fn complete(self: &Arc<Self>, generation: u64) {
        let (active, queued, released) = {
            let mut inner = self.lock();
            if generation != inner.generation {
                drop(inner);
                emit!(AbandonedSlotCompleted);
                return;
            }
            match inner.active.checked_sub(1) {
                Some(active) => inner.active = active,
                None => {
                    let limit = inner.limit;
                    drop(inner);
                    emit!(UnmatchedSlotCompletion { limit });
                    return;
                }
            }
            let released = self.release_next(&mut inner);
            self.settle(&mut inner);
            (inner.active, inner.queued(), released)
        };
        emit!(SlotCompleted { active, queued });
        Self::dispatch(released);
    }

    /// Forgets queued callers that dropped their `Deferred`.
    pub(super) fn cancel(&self) {
        let queued = {
            let mut inner = self.lock();
            inner.queue.retain(|waiter| !waiter.tx.is_closed());
            inner.queue.len()
        };
        emit!(QueuedRequestCancelled { queued });
    }

    fn settle(&self, inner: &mut Inner) {
        if inner.phase == Phase::Draining && inner.active == 0 {
            self.transition(inner, Phase::Stopped(ShutdownOutcome::Graceful));
        }
    }

    fn force_stop(self: &Arc<Self>) -> ShutdownOutcome {
        let (outcome, released) = {
            let mut inner = self.lock();
            if let Phase::Stopped(outcome) = inner.phase {
                return outcome;
            }
            let abandoned = replace(&mut inner.active, 0);
            inner.generation += 1;
            let released = self.release_next(&mut inner);
            let outcome = ShutdownOutcome::Forced { abandoned };
            self.transition(&mut inner, Phase::Stopped(outcome));
            (outcome, released)
        };
        Self::dispatch(released);
        outcome
    }

    fn transition(&self, inner: &mut Inner, phase: Phase) {
        inner.phase = phase;
        // Cannot fail, `phase_rx` keeps the channel open.
        let _ = self.phase_tx.send(phase);
    }
}

/// The sender lives in `Shared`, which every receiver's owner keeps alive.
async fn wait_for_stop(phase: &mut watch::Receiver<Phase>) -> ShutdownOutcome {
    loop {
        if let Phase::Stopped(outcome) = *phase.borrow() {
            return outcome;
        }
        phase
            .changed()
            .await
            .expect("Controller phase sender dropped");
    }
}

/// Obligation to complete exactly one admitted slot.
///
/// Completing consumes the token, so a slot cannot be returned twice.
/// Dropping the token completes it as well.
#[must_use = "dropping a `SlotToken` completes its slot immediately"]
pub struct SlotToken {
    shared: Arc<Shared>,
    generation: u64,
}

impl SlotToken {
    pub fn complete(self) {
        drop(self)
    }

    /// Whether a forced shutdown gave up on this slot.
    pub fn is_abandoned(&self) -> bool {
        self.shared.lock().generation != self.generation
    }

    /// Resolves once a forced shutdown gives up on this slot. Work holding
    /// the token should stop when this fires.
    pub async fn abandoned(&self) {
        let mut phase = self.shared.phase_rx.clone();
        while !self.is_abandoned() {
            if phase.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for SlotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotToken")
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for SlotToken {
    fn drop(&mut self) {
        self.shared.complete(self.generation);
    }
}
