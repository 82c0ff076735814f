use super::InternalEvent;
use crate::admission::{Rejection, ShutdownOutcome};
use metrics::{counter, gauge, histogram};
use std::time::Duration;

#[derive(Debug)]
pub struct RequestAdmitted {
    pub active: usize,
    pub limit: usize,
}

impl InternalEvent for RequestAdmitted {
    fn emit_logs(&self) {
        trace!(message = "Request admitted.", active = self.active, limit = self.limit);
    }

    fn emit_metrics(&self) {
        counter!("requests_admitted_total", 1);
        gauge!("admission_active_slots", self.active as f64);
    }
}

#[derive(Debug)]
pub struct RequestDeferred {
    pub position: usize,
    pub active: usize,
}

impl InternalEvent for RequestDeferred {
    fn emit_logs(&self) {
        debug!(
            message = "Request deferred, all slots in use.",
            position = self.position,
            active = self.active,
        );
    }

    fn emit_metrics(&self) {
        counter!("requests_deferred_total", 1);
        gauge!("admission_queue_length", self.position as f64);
    }
}

#[derive(Debug)]
pub struct RequestReleased {
    pub waited: Duration,
}

impl InternalEvent for RequestReleased {
    fn emit_logs(&self) {
        debug!(message = "Released queued request.", waited = ?self.waited);
    }

    fn emit_metrics(&self) {
        counter!("requests_released_total", 1);
        histogram!("admission_queue_wait_seconds", self.waited.as_secs_f64());
    }
}

#[derive(Debug)]
pub struct QueuedRequestCancelled {
    pub queued: usize,
}

impl InternalEvent for QueuedRequestCancelled {
    fn emit_logs(&self) {
        debug!(message = "Queued request went away.", queued = self.queued);
    }

    fn emit_metrics(&self) {
        counter!("requests_cancelled_total", 1);
        gauge!("admission_queue_length", self.queued as f64);
    }
}

#[derive(Debug)]
pub struct SlotCompleted {
    pub active: usize,
    pub queued: usize,
}

impl InternalEvent for SlotCompleted {
    fn emit_logs(&self) {
        trace!(
            message = "Slot completed.",
            active = self.active,
            queued = self.queued,
        );
    }

    fn emit_metrics(&self) {
        counter!("requests_completed_total", 1);
        gauge!("admission_active_slots", self.active as f64);
        gauge!("admission_queue_length", self.queued as f64);
    }
}

#[derive(Debug)]
pub struct RequestRejected {
    pub reason: Rejection,
}

impl InternalEvent for RequestRejected {
    fn emit_logs(&self) {
        debug!(message = "Request rejected.", reason = %self.reason);
    }

    fn emit_metrics(&self) {
        counter!("requests_rejected_total", 1, "reason" => self.reason.as_str());
    }
}

#[derive(Debug)]
pub struct AdmissionLimitChanged {
    pub old: usize,
    pub new: usize,
    pub active: usize,
    pub queued: usize,
}

impl InternalEvent for AdmissionLimitChanged {
    fn emit_logs(&self) {
        info!(
            message = "Concurrency limit changed.",
            old = self.old,
            new = self.new,
            active = self.active,
            queued = self.queued,
        );
    }

    fn emit_metrics(&self) {
        gauge!("admission_limit", self.new as f64);
        gauge!("admission_active_slots", self.active as f64);
        gauge!("admission_queue_length", self.queued as f64);
    }
}

#[derive(Debug)]
pub struct ShutdownStarted {
    pub active: usize,
    pub queued: usize,
}

impl InternalEvent for ShutdownStarted {
    fn emit_logs(&self) {
        info!(
            message = "Shutting down, draining active requests.",
            active = self.active,
            queued = self.queued,
        );
    }

    fn emit_metrics(&self) {
        gauge!("admission_active_slots", self.active as f64);
        // Every queued caller was turned away.
        gauge!("admission_queue_length", 0.0);
    }
}

#[derive(Debug)]
pub struct ShutdownCompleted {
    pub outcome: ShutdownOutcome,
    pub elapsed: Duration,
}

impl InternalEvent for ShutdownCompleted {
    fn emit_logs(&self) {
        match self.outcome {
            ShutdownOutcome::Graceful => {
                info!(message = "Shutdown completed gracefully.", elapsed = ?self.elapsed)
            }
            ShutdownOutcome::Forced { abandoned } => warn!(
                message = "Shutdown timed out, abandoned active requests.",
                abandoned,
                elapsed = ?self.elapsed,
            ),
        }
    }

    fn emit_metrics(&self) {
        if let ShutdownOutcome::Forced { abandoned } = self.outcome {
            counter!("admission_abandoned_slots_total", abandoned as u64);
        }
        gauge!("admission_active_slots", 0.0);
        gauge!("admission_queue_length", 0.0);
    }
}

#[derive(Debug)]
pub struct AbandonedSlotCompleted;

impl InternalEvent for AbandonedSlotCompleted {
    fn emit_logs(&self) {
        debug!(message = "Slot completed after forced shutdown, ignoring.");
    }
}

#[derive(Debug)]
pub struct UnmatchedSlotCompletion {
    pub limit: usize,
}

impl InternalEvent for UnmatchedSlotCompletion {
    fn emit_logs(&self) {
        error!(
            message = "Slot completed with no active slots, ignoring.",
            limit = self.limit,
        );
    }

    fn emit_metrics(&self) {
        counter!("admission_completion_violations_total", 1);
    }
}
