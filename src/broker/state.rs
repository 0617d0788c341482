//! Broker state — relay registry, connection roles, listener attachment.
//!
//! All methods are pure state transitions with no socket I/O. Owned
//! exclusively by the broker loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ipc::protocol::{RelayStatus, Role};
use crate::relay::{
    DeepLinkEvent, DeepLinkRetrievalError, EventEmitter, ListenerAttachment, MODULE_NAME,
    NotifyOutcome, RelayRegistry,
};

use super::launch::LaunchContext;

/// Unique identifier for a client connection.
///
/// Monotonically increasing counter. Used to route events to the
/// attached runtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    role: Role,
    /// Relay generation installed by this connection (runtime only).
    generation: Option<u64>,
}

/// An event the broker loop must push to a runtime connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitAction {
    pub target_connection: ConnectionId,
    pub event: DeepLinkEvent,
}

/// The relay's view of the listener: the attached connection, if any,
/// and the event produced for it.
#[derive(Debug)]
pub struct ListenerRoute {
    target: Option<ConnectionId>,
    emitted: Option<EmitAction>,
}

impl ListenerRoute {
    pub fn new(target: Option<ConnectionId>) -> Self {
        Self {
            target,
            emitted: None,
        }
    }

    pub fn into_action(self) -> Option<EmitAction> {
        self.emitted
    }
}

impl ListenerAttachment for ListenerRoute {
    fn is_attached(&self) -> bool {
        self.target.is_some()
    }
}

impl EventEmitter for ListenerRoute {
    fn emit(&mut self, event: DeepLinkEvent) {
        if let Some(target_connection) = self.target {
            self.emitted = Some(EmitAction {
                target_connection,
                event,
            });
        }
    }
}

#[derive(Debug)]
pub struct BrokerState {
    registry: RelayRegistry,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// The single logical subscriber. A newer `add_listener` supersedes.
    listener: Option<ConnectionId>,
    launch: LaunchContext,
}

impl BrokerState {
    pub fn new(intent_file: Option<PathBuf>) -> Self {
        Self {
            registry: RelayRegistry::new(),
            connections: HashMap::new(),
            listener: None,
            launch: LaunchContext::new(intent_file),
        }
    }

    /// Register a connection after a successful handshake.
    ///
    /// A runtime connection installs a fresh relay generation (the
    /// runtime was started or reloaded). Returns that generation.
    pub fn add_connection(&mut self, id: ConnectionId, role: Role) -> Option<u64> {
        let generation = match role {
            Role::Runtime => Some(self.registry.install().generation()),
            Role::Source | Role::Client => None,
        };
        self.connections
            .insert(id, ConnectionEntry { role, generation });
        generation
    }

    /// Forget a connection: drop its listener attachment and tear down
    /// its relay generation. The pending link is kept.
    ///
    /// If the torn-down generation was current while another runtime
    /// still holds the listener, that runtime gets a fresh generation.
    pub fn remove_connection(&mut self, id: ConnectionId) {
        if self.listener == Some(id) {
            self.listener = None;
        }
        let Some(entry) = self.connections.remove(&id) else {
            return;
        };
        let Some(generation) = entry.generation else {
            return;
        };
        if !self.registry.clear(generation) {
            return;
        }
        if let Some(holder) = self.listener {
            if let Some(entry) = self.connections.get_mut(&holder) {
                let reinstalled = self.registry.install().generation();
                entry.generation = Some(reinstalled);
                tracing::debug!(
                    ?holder,
                    generation = reinstalled,
                    "relay reinstalled for listener"
                );
            }
        }
    }

    /// Whether `id` has completed the handshake.
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Role of a handshaken connection.
    pub fn connection_role(&self, id: ConnectionId) -> Option<Role> {
        self.connections.get(&id).map(|e| e.role)
    }

    pub fn attach_listener(&mut self, id: ConnectionId) {
        if let Some(previous) = self.listener.replace(id) {
            if previous != id {
                tracing::debug!(?previous, current = ?id, "listener superseded");
            }
        }
    }

    /// Detach `id` if it is the current listener. Returns whether it was.
    pub fn detach_listener(&mut self, id: ConnectionId) -> bool {
        if self.listener == Some(id) {
            self.listener = None;
            true
        } else {
            false
        }
    }

    pub fn listener(&self) -> Option<ConnectionId> {
        self.listener
    }

    /// Route an activation URL through the relay.
    pub fn notify(&mut self, url: Option<&str>) -> (NotifyOutcome, Option<EmitAction>) {
        let mut route = ListenerRoute::new(self.listener);
        let outcome = self.registry.notify(url, &mut route);
        (outcome, route.into_action())
    }

    /// Route a cold-start URL: like [`notify`](Self::notify), and if it
    /// was parked, also record it in the launch context.
    pub fn launch(&mut self, url: Option<&str>) -> (NotifyOutcome, Option<EmitAction>) {
        let (outcome, action) = self.notify(url);
        if let (NotifyOutcome::Buffered { .. }, Some(url)) = (outcome, url) {
            self.launch.record(url.to_string());
        }
        (outcome, action)
    }

    /// Park an event that could not be pushed to its listener.
    ///
    /// The listener is detached first so the relay buffers the link
    /// instead of emitting it again.
    pub fn requeue(&mut self, action: EmitAction) -> NotifyOutcome {
        self.detach_listener(action.target_connection);
        let mut route = ListenerRoute::new(None);
        self.registry.notify(Some(&action.event.url), &mut route)
    }

    pub fn drain_initial(&mut self) -> Result<Option<String>, DeepLinkRetrievalError> {
        self.registry.drain_initial(&mut self.launch)
    }

    pub fn status(&self) -> RelayStatus {
        let snapshot = self.registry.snapshot();
        RelayStatus {
            module: MODULE_NAME.into(),
            generation: snapshot.generation,
            pending: snapshot.pending,
            launch: self.launch.peek().map(str::to_string),
            listener_attached: self.listener().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> BrokerState {
        BrokerState::new(None)
    }

    fn runtime(s: &mut BrokerState) -> ConnectionId {
        let c = ConnectionId::new();
        s.add_connection(c, Role::Runtime);
        c
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn runtime_connection_installs_relay() {
        let mut s = state();
        let c = ConnectionId::new();
        let generation = s.add_connection(c, Role::Runtime);
        assert!(generation.is_some());
        assert_eq!(s.status().generation, generation);
        assert_eq!(s.connection_role(c), Some(Role::Runtime));
    }

    #[test]
    fn source_connection_installs_nothing() {
        let mut s = state();
        assert_eq!(s.add_connection(ConnectionId::new(), Role::Source), None);
        assert_eq!(s.status().generation, None);
    }

    #[test]
    fn notify_without_listener_buffers() {
        let mut s = state();
        runtime(&mut s);
        let (outcome, action) = s.notify(Some("app://a"));
        assert_eq!(outcome, NotifyOutcome::Buffered { replaced: false });
        assert!(action.is_none());
        assert_eq!(s.status().pending, Some("app://a".into()));
    }

    #[test]
    fn notify_with_listener_targets_it() {
        let mut s = state();
        let c = runtime(&mut s);
        s.attach_listener(c);
        let (outcome, action) = s.notify(Some("app://live"));
        assert_eq!(outcome, NotifyOutcome::Emitted);
        assert_eq!(
            action,
            Some(EmitAction {
                target_connection: c,
                event: DeepLinkEvent {
                    url: "app://live".into()
                },
            })
        );
        assert_eq!(s.status().pending, None);
    }

    #[test]
    fn newer_listener_supersedes() {
        let mut s = state();
        let old = runtime(&mut s);
        let new = runtime(&mut s);
        s.attach_listener(old);
        s.attach_listener(new);
        assert_eq!(s.listener(), Some(new));
        assert!(!s.detach_listener(old));
        assert_eq!(s.listener(), Some(new));
    }

    #[test]
    fn runtime_disconnect_detaches_and_keeps_pending() {
        let mut s = state();
        let c = runtime(&mut s);
        s.notify(Some("app://held"));
        s.attach_listener(c);
        s.remove_connection(c);

        let status = s.status();
        assert!(!status.listener_attached);
        assert_eq!(status.generation, None);
        assert_eq!(status.pending, Some("app://held".into()));
    }

    #[test]
    fn short_lived_runtime_does_not_break_attached_listener() {
        let mut s = state();
        let holder = runtime(&mut s);
        s.attach_listener(holder);

        let one_shot = runtime(&mut s);
        s.remove_connection(one_shot);
        assert!(s.status().generation.is_some());

        let (outcome, action) = s.notify(Some("app://live"));
        assert_eq!(outcome, NotifyOutcome::Emitted);
        assert_eq!(action.map(|a| a.target_connection), Some(holder));
        assert_eq!(s.status().pending, None);
    }

    #[test]
    fn listener_generation_teardown_is_not_stale_after_reinstall() {
        let mut s = state();
        let holder = runtime(&mut s);
        s.attach_listener(holder);
        let one_shot = runtime(&mut s);
        s.remove_connection(one_shot);

        // The holder now owns the current generation and clears it.
        s.remove_connection(holder);
        assert_eq!(s.status().generation, None);
        assert!(!s.status().listener_attached);
    }

    #[test]
    fn emission_clears_link_parked_before_attach() {
        let mut s = state();
        let c = runtime(&mut s);
        s.notify(Some("app://old"));
        s.attach_listener(c);
        let (outcome, _) = s.notify(Some("app://new"));
        assert_eq!(outcome, NotifyOutcome::Emitted);
        assert_eq!(s.drain_initial(), Ok(None));
    }

    #[test]
    fn registration_is_tracked() {
        let mut s = state();
        let c = ConnectionId::new();
        assert!(!s.is_registered(c));
        s.add_connection(c, Role::Client);
        assert!(s.is_registered(c));
    }

    #[test]
    fn reload_recovers_pending_link() {
        let mut s = state();
        let first = runtime(&mut s);
        s.notify(Some("app://across-reload"));
        s.remove_connection(first);

        runtime(&mut s);
        assert_eq!(s.drain_initial(), Ok(Some("app://across-reload".into())));
        assert_eq!(s.drain_initial(), Ok(None));
    }

    #[test]
    fn launch_buffered_is_delivered_once() {
        let mut s = state();
        let (outcome, _) = s.launch(Some("https://ex.com/x"));
        assert_eq!(outcome, NotifyOutcome::Buffered { replaced: false });
        assert_eq!(s.status().launch, Some("https://ex.com/x".into()));

        runtime(&mut s);
        assert_eq!(s.drain_initial(), Ok(Some("https://ex.com/x".into())));
        assert_eq!(s.drain_initial(), Ok(None));
    }

    #[test]
    fn launch_survives_later_overwrite() {
        let mut s = state();
        s.launch(Some("app://launch"));
        s.notify(Some("app://later"));

        assert_eq!(s.drain_initial(), Ok(Some("app://launch".into())));
        assert_eq!(s.drain_initial(), Ok(Some("app://later".into())));
        assert_eq!(s.drain_initial(), Ok(None));
    }

    #[test]
    fn launch_emitted_is_not_recorded() {
        let mut s = state();
        let c = runtime(&mut s);
        s.attach_listener(c);
        let (outcome, action) = s.launch(Some("app://warm"));
        assert_eq!(outcome, NotifyOutcome::Emitted);
        assert!(action.is_some());
        assert_eq!(s.status().launch, None);
        assert_eq!(s.drain_initial(), Ok(None));
    }

    #[test]
    fn requeue_parks_undeliverable_event() {
        let mut s = state();
        let c = runtime(&mut s);
        s.attach_listener(c);
        let (_, action) = s.notify(Some("app://lost-socket"));

        let outcome = s.requeue(action.unwrap());
        assert_eq!(outcome, NotifyOutcome::Buffered { replaced: false });
        assert_eq!(s.listener(), None);
        assert_eq!(s.drain_initial(), Ok(Some("app://lost-socket".into())));
    }

    #[test]
    fn pending_link_drains_after_retrieval_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = BrokerState::new(Some(dir.path().to_path_buf()));
        runtime(&mut s);
        s.notify(Some("app://p"));

        assert!(s.drain_initial().is_err());
        assert_eq!(s.drain_initial(), Ok(Some("app://p".into())));
        assert_eq!(s.drain_initial(), Ok(None));
    }

    #[test]
    fn status_names_module() {
        assert_eq!(state().status().module, "RowtDeepLink");
    }
}
