//! Input hook seam. Registering with the OS input system is a platform
//! service; the click source only needs `register` and `unregister`.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::scheduler::TriggerSender;
use super::{SubmitOutcome, TriggerKind};
use crate::error::HookError;

/// Handed to a hook on registration. Call `clicked` for every qualifying
/// input event.
#[derive(Clone)]
pub struct ClickSink {
    sender: TriggerSender,
}

impl ClickSink {
    pub fn new(sender: TriggerSender) -> Self {
        Self { sender }
    }

    pub fn clicked(&self) -> SubmitOutcome {
        self.sender.submit(TriggerKind::Click)
    }
}

/// OS-level input event subscription
pub trait InputHook: Send + Sync {
    fn register(&self, sink: ClickSink) -> Result<(), HookError>;

    /// Stop delivering events. Unregistering twice is a no-op.
    fn unregister(&self);
}

/// Hook driven by the caller: tests, and the CLI's stdin clicks
pub struct ManualHook {
    sink: Mutex<Option<ClickSink>>,
    available: AtomicBool,
}

impl ManualHook {
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }

    /// A hook whose registration always fails
    pub fn unavailable() -> Self {
        let hook = Self::new();
        hook.available.store(false, Ordering::SeqCst);
        hook
    }

    pub fn is_registered(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Simulate a qualifying click. `None` when nothing is registered.
    pub fn click(&self) -> Option<SubmitOutcome> {
        self.sink.lock().as_ref().map(ClickSink::clicked)
    }
}

impl Default for ManualHook {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHook for ManualHook {
    fn register(&self, sink: ClickSink) -> Result<(), HookError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(HookError("input events are not available on this system".into()));
        }
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn unregister(&self) {
        self.sink.lock().take();
    }
}
