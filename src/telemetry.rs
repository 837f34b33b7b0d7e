//! Telemetry domain: transition events and the sinks that receive them.

pub mod events;
pub mod sinks;

pub use events::TransitionEvent;
pub use sinks::{emit_best_effort, FanoutSink, ProgressBus, ProgressSink, TracingSink};
