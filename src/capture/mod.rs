//! Rewinder - Capture
//!
//! Trigger sources feed a single submit point; one worker runs captures
//! through the pipeline, never two at a time.

pub mod frame;
pub mod hook;
pub mod pipeline;
pub mod scheduler;

use std::fmt;

pub use frame::{FrameSource, TestPattern};
#[cfg(feature = "screen")]
pub use frame::PrimaryMonitor;
pub use hook::{ClickSink, InputHook, ManualHook};
pub use pipeline::{CaptureClock, CapturePipeline};
pub use scheduler::{CaptureScheduler, SourceState, TriggerSender};

/// What caused a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Periodic timer fired
    Periodic,
    /// Qualifying input event
    Click,
    /// Explicit request
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerKind::Periodic => "periodic",
            TriggerKind::Click => "click",
            TriggerKind::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Result of handing a trigger to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Waiting for the worker
    Queued,
    /// Dropped because a capture is already pending
    Coalesced,
    /// Scheduler has shut down
    Closed,
}
