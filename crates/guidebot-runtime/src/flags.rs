//! Per-conversation flags shared between tools and the session.
//!
//! Tools run inside the reasoning loop and cannot change the state machine
//! into states that only make sense after the reply is spoken.  They raise a
//! flag here instead and the session acts on it once speaking is done.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SessionFlags {
    user_ended: AtomicBool,
    end_requested: AtomicBool,
    staff_call: Mutex<Option<String>>,
}

impl SessionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user asked to stop; navigation aborts are not retried.
    pub fn mark_user_ended(&self) {
        self.user_ended.store(true, Ordering::SeqCst);
    }

    pub fn user_ended(&self) -> bool {
        self.user_ended.load(Ordering::SeqCst)
    }

    /// Close the conversation and return to base after the reply.
    pub fn request_end(&self) {
        self.end_requested.store(true, Ordering::SeqCst);
        self.mark_user_ended();
    }

    pub fn take_end_request(&self) -> bool {
        self.end_requested.swap(false, Ordering::SeqCst)
    }

    pub fn request_staff(&self, reason: impl Into<String>) {
        *self.staff() = Some(reason.into());
    }

    pub fn take_staff_call(&self) -> Option<String> {
        self.staff().take()
    }

    pub fn clear(&self) {
        self.user_ended.store(false, Ordering::SeqCst);
        self.end_requested.store(false, Ordering::SeqCst);
        self.staff().take();
    }

    fn staff(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.staff_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_request_marks_user_ended() {
        let flags = SessionFlags::new();
        flags.request_end();
        assert!(flags.user_ended());
        assert!(flags.take_end_request());
        assert!(!flags.take_end_request());
    }

    #[test]
    fn clear_resets_everything() {
        let flags = SessionFlags::new();
        flags.request_staff("試着");
        flags.request_end();
        flags.clear();
        assert!(!flags.user_ended());
        assert!(flags.take_staff_call().is_none());
    }
}
