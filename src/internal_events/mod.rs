mod agent;
mod federation;
mod kubernetes;
mod process;

pub use self::agent::*;
pub use self::federation::*;
pub use self::kubernetes::*;
pub use self::process::*;

pub trait InternalEvent {
    fn emit_logs(&self) {}
}

pub fn emit(event: impl InternalEvent) {
    event.emit_logs();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}
