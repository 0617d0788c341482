//! Relay registry — the "current active relay" handle.
//!
//! Owns the one [`PendingLink`] slot for the process and the handle of
//! the relay generation that currently serves the runtime. Activation
//! URLs may arrive before any relay is installed, between a teardown
//! and the next install, or from a thread other than the broker loop;
//! all of these land in the same slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{
    ActivationContext, DeepLinkRetrievalError, EventEmitter, ListenerAttachment, NotifyOutcome,
    PendingLink, Relay,
};

/// Read-only view of the registry for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Generation of the installed relay, `None` if none is installed.
    pub generation: Option<u64>,
    pub pending: Option<String>,
}

#[derive(Debug)]
pub struct RelayRegistry {
    pending: Arc<PendingLink>,
    current: RwLock<Option<Arc<Relay>>>,
    next_generation: AtomicU64,
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(PendingLink::new()),
            current: RwLock::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Install a fresh relay generation, replacing the current one.
    ///
    /// The pending slot carries over unchanged.
    pub fn install(&self) -> Arc<Relay> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let relay = Arc::new(Relay::new(generation, Arc::clone(&self.pending)));
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&relay));
        tracing::debug!(
            generation,
            replaced = ?previous.as_ref().map(|r| r.generation()),
            pending = self.pending.is_held(),
            "relay installed"
        );
        relay
    }

    /// Clear the handle if `generation` is still the current one.
    ///
    /// Returns `false` if a newer relay has been installed since (or
    /// nothing is installed), in which case nothing changes.
    pub fn clear(&self, generation: u64) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(relay) if relay.generation() == generation => {
                *current = None;
                tracing::debug!(
                    generation,
                    pending = self.pending.is_held(),
                    "relay cleared"
                );
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<Arc<Relay>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Route an activation URL to the current relay.
    ///
    /// With no relay installed the listener is still consulted: an
    /// attached listener gets the event, otherwise the URL goes
    /// straight into the pending slot.
    pub fn notify<L>(&self, url: Option<&str>, listener: &mut L) -> NotifyOutcome
    where
        L: ListenerAttachment + EventEmitter,
    {
        match self.current() {
            Some(relay) => relay.notify(url, listener),
            None => self.unbound().notify(url, listener),
        }
    }

    /// Drain the initial link through the current relay, or directly
    /// from the slot if none is installed.
    pub fn drain_initial<C>(&self, context: &mut C) -> Result<Option<String>, DeepLinkRetrievalError>
    where
        C: ActivationContext,
    {
        match self.current() {
            Some(relay) => relay.drain_initial(context),
            None => self.unbound().drain_initial(context),
        }
    }

    /// A relay view over the shared slot for use between generations.
    fn unbound(&self) -> Relay {
        Relay::new(0, Arc::clone(&self.pending))
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            generation: self.current().map(|r| r.generation()),
            pending: self.pending.peek(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::{FakeContext, FakeListener};

    #[test]
    fn notify_before_install_is_recovered_after_install() {
        let reg = RelayRegistry::new();
        let out = reg.notify(Some("app://cold"), &mut FakeListener::detached());
        assert_eq!(out, NotifyOutcome::Buffered { replaced: false });

        let relay = reg.install();
        assert_eq!(
            relay.drain_initial(&mut FakeContext::default()),
            Ok(Some("app://cold".into()))
        );
    }

    #[test]
    fn notify_before_install_ignores_empty() {
        let reg = RelayRegistry::new();
        assert_eq!(
            reg.notify(Some(""), &mut FakeListener::detached()),
            NotifyOutcome::Ignored
        );
        assert_eq!(reg.notify(None, &mut FakeListener::detached()), NotifyOutcome::Ignored);
        assert_eq!(reg.snapshot().pending, None);
    }

    #[test]
    fn notify_without_relay_emits_to_attached_listener() {
        let reg = RelayRegistry::new();
        let relay = reg.install();
        reg.notify(Some("app://old"), &mut FakeListener::detached());
        assert!(reg.clear(relay.generation()));

        let mut l = FakeListener::attached();
        assert_eq!(reg.notify(Some("app://live"), &mut l), NotifyOutcome::Emitted);
        assert_eq!(l.events.len(), 1);
        assert_eq!(reg.snapshot().pending, None);
    }

    #[test]
    fn notify_routes_to_installed_relay() {
        let reg = RelayRegistry::new();
        reg.install();
        let mut l = FakeListener::attached();
        assert_eq!(reg.notify(Some("app://live"), &mut l), NotifyOutcome::Emitted);
        assert_eq!(l.events.len(), 1);
    }

    #[test]
    fn pending_link_survives_replacement() {
        let reg = RelayRegistry::new();
        let first = reg.install();
        first.notify(Some("app://unconsumed"), &mut FakeListener::detached());

        let second = reg.install();
        assert_ne!(first.generation(), second.generation());
        assert_eq!(
            second.drain_initial(&mut FakeContext::default()),
            Ok(Some("app://unconsumed".into()))
        );
        assert_eq!(first.drain_initial(&mut FakeContext::default()), Ok(None));
    }

    #[test]
    fn pending_link_survives_clear() {
        let reg = RelayRegistry::new();
        let relay = reg.install();
        reg.notify(Some("app://held"), &mut FakeListener::detached());
        assert!(reg.clear(relay.generation()));
        assert!(reg.current().is_none());
        assert_eq!(reg.snapshot().pending, Some("app://held".into()));

        reg.install();
        assert_eq!(
            reg.drain_initial(&mut FakeContext::default()),
            Ok(Some("app://held".into()))
        );
    }

    #[test]
    fn stale_clear_does_not_remove_newer_relay() {
        let reg = RelayRegistry::new();
        let old = reg.install();
        let new = reg.install();
        assert!(!reg.clear(old.generation()));
        assert_eq!(reg.snapshot().generation, Some(new.generation()));
    }

    #[test]
    fn drain_without_relay_reads_slot() {
        let reg = RelayRegistry::new();
        reg.notify(Some("app://x"), &mut FakeListener::detached());
        let mut ctx = FakeContext::default();
        assert_eq!(reg.drain_initial(&mut ctx), Ok(Some("app://x".into())));
        assert_eq!(reg.drain_initial(&mut ctx), Ok(None));
    }

    #[test]
    fn notify_from_foreign_thread_before_install() {
        let reg = Arc::new(RelayRegistry::new());
        let handle = Arc::clone(&reg);
        std::thread::spawn(move || {
            handle.notify(Some("app://os-thread"), &mut FakeListener::detached());
        })
        .join()
        .unwrap();

        reg.install();
        assert_eq!(
            reg.drain_initial(&mut FakeContext::default()),
            Ok(Some("app://os-thread".into()))
        );
    }

    #[test]
    fn snapshot_reports_generation_and_pending() {
        let reg = RelayRegistry::new();
        assert_eq!(
            reg.snapshot(),
            RegistrySnapshot {
                generation: None,
                pending: None
            }
        );
        let relay = reg.install();
        reg.notify(Some("app://p"), &mut FakeListener::detached());
        assert_eq!(
            reg.snapshot(),
            RegistrySnapshot {
                generation: Some(relay.generation()),
                pending: Some("app://p".into())
            }
        );
    }
}
