//! Single-slot pending link buffer.
//!
//! Holds at most one URL that arrived while no listener could receive
//! it. Newer links overwrite older unconsumed ones. The slot is
//! mutex-guarded so that activation callbacks from a foreign thread can
//! write it before the runtime has attached.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// The process-wide pending link slot.
#[derive(Debug, Default)]
pub struct PendingLink {
    slot: Mutex<Option<String>>,
}

impl PendingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a link, returning the unconsumed link it replaced.
    pub fn store(&self, url: String) -> Option<String> {
        self.lock().replace(url)
    }

    /// Take the link out of the slot, leaving it empty.
    pub fn take(&self) -> Option<String> {
        self.lock().take()
    }

    /// Clear the slot only if it holds exactly `url`.
    ///
    /// Returns `true` if the slot was cleared.
    pub fn take_if_eq(&self, url: &str) -> bool {
        let mut slot = self.lock();
        if slot.as_deref() == Some(url) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Copy of the held link, without consuming it.
    pub fn peek(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn is_held(&self) -> bool {
        self.lock().is_some()
    }

    // A panic while holding the lock cannot leave the Option torn, so a
    // poisoned guard is still a valid slot.
    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
