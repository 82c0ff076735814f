mod admission;

pub use self::admission::*;

pub trait InternalEvent {
    fn emit_logs(&self) {}
    fn emit_metrics(&self) {}
}

pub fn emit(event: impl InternalEvent) {
    event.emit_logs();
    event.emit_metrics();
}

macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}
