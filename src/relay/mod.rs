//! Deep link relay — exactly-once handoff of activation URLs.
//!
//! The relay sits between an activation source (reports URLs at any
//! time, possibly before a runtime exists) and a runtime listener
//! (attaches at some later time). Each reported URL is either emitted
//! to the attached listener right away or parked in the single
//! [`PendingLink`] slot until the runtime drains it.
//!
//! Pure logic, no I/O. The collaborators are reached through the
//! [`ListenerAttachment`], [`EventEmitter`] and [`ActivationContext`]
//! traits; the broker provides connection-backed implementations.
//!
//! State machine per slot:
//!
//! ```text
//! NoPendingLink  --notify(u), unattached--> PendingLinkHeld
//! PendingLinkHeld --notify(u), unattached--> PendingLinkHeld (overwrite)
//! any            --notify(u), attached----> NoPendingLink (emitted, slot cleared)
//! PendingLinkHeld --drain_initial()-------> NoPendingLink
//! ```

pub mod pending;
pub mod registry;

use std::sync::Arc;

pub use pending::PendingLink;
pub use registry::RelayRegistry;

/// Name the relay registers under on the runtime side.
pub const MODULE_NAME: &str = "RowtDeepLink";

/// Name of the one outbound event.
pub const DEEP_LINK_EVENT: &str = "onRowtDeepLinkReceived";

/// Rejection code for a failed `getInitialDeepLink`.
pub const DEEPLINK_ERROR: &str = "DEEPLINK_ERROR";

/// Payload of [`DEEP_LINK_EVENT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkEvent {
    pub url: String,
}

/// Reading the foreground activation context failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to get initial deep link: {reason}")]
pub struct DeepLinkRetrievalError {
    pub reason: String,
}

impl DeepLinkRetrievalError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Machine-readable code for the wire rejection.
    pub fn code(&self) -> &'static str {
        DEEPLINK_ERROR
    }
}

/// Whether a runtime listener can currently receive events.
///
/// Owned by the runtime side; the relay only queries it.
pub trait ListenerAttachment {
    fn is_attached(&self) -> bool;
}

/// Delivers a one-shot event to the attached listener.
pub trait EventEmitter {
    fn emit(&mut self, event: DeepLinkEvent);
}

/// The foreground activation context (the cold-start launch intent).
pub trait ActivationContext {
    /// Hand out the launch URL that has not yet been delivered, if any.
    ///
    /// A URL is handed out at most once.
    fn take_launch_url(&mut self) -> Result<Option<String>, DeepLinkRetrievalError>;
}

/// What a single `notify` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Absent or empty URL. Nothing emitted, nothing stored.
    Ignored,
    /// Emitted to the attached listener; not stored.
    Emitted,
    /// Stored as the pending link. `replaced` is set when an unconsumed
    /// link was overwritten.
    Buffered { replaced: bool },
}

impl NotifyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Emitted => "emitted",
            Self::Buffered { .. } => "buffered",
        }
    }
}

/// One relay generation.
///
/// Every generation installed by a [`RelayRegistry`] shares the
/// registry's pending slot, so a link parked under one generation is
/// drained by the next.
#[derive(Debug)]
pub struct Relay {
    generation: u64,
    pending: Arc<PendingLink>,
}

impl Relay {
    pub fn new(generation: u64, pending: Arc<PendingLink>) -> Self {
        Self {
            generation,
            pending,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Route an activation URL: emit it if a listener is attached,
    /// otherwise park it (newest wins).
    pub fn notify<L>(&self, url: Option<&str>, listener: &mut L) -> NotifyOutcome
    where
        L: ListenerAttachment + EventEmitter,
    {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return NotifyOutcome::Ignored;
        };

        if listener.is_attached() {
            listener.emit(DeepLinkEvent {
                url: url.to_string(),
            });
            // The listener has seen a newer link; an older parked one is stale.
            if let Some(stale) = self.pending.take() {
                tracing::debug!(
                    generation = self.generation,
                    dropped = %stale,
                    "stale pending link cleared by live emission"
                );
            }
            tracing::debug!(generation = self.generation, url, "deep link emitted");
            NotifyOutcome::Emitted
        } else {
            let replaced = self.pending.store(url.to_string());
            if let Some(old) = &replaced {
                tracing::debug!(
                    generation = self.generation,
                    dropped = %old,
                    "unconsumed deep link overwritten"
                );
            }
            tracing::debug!(generation = self.generation, url, "deep link buffered");
            NotifyOutcome::Buffered {
                replaced: replaced.is_some(),
            }
        }
    }

    /// Retrieve a link that arrived before the runtime was ready.
    ///
    /// Priority: the context's launch URL, then the pending slot. Each
    /// URL is returned at most once. On a context failure the pending
    /// slot is left as is.
    pub fn drain_initial<C>(&self, context: &mut C) -> Result<Option<String>, DeepLinkRetrievalError>
    where
        C: ActivationContext,
    {
        if let Some(url) = context.take_launch_url()? {
            // Cold-start links are parked in both places.
            self.pending.take_if_eq(&url);
            return Ok(Some(url));
        }
        Ok(self.pending.take())
    }

    #[cfg(test)]
    pub fn pending(&self) -> &PendingLink {
        &self.pending
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake collaborators shared by relay and registry tests.

    use super::*;

    #[derive(Debug, Default)]
    pub struct FakeListener {
        pub attached: bool,
        pub events: Vec<DeepLinkEvent>,
    }

    impl FakeListener {
        pub fn attached() -> Self {
            Self {
                attached: true,
                events: Vec::new(),
            }
        }

        pub fn detached() -> Self {
            Self::default()
        }
    }

    impl ListenerAttachment for FakeListener {
        fn is_attached(&self) -> bool {
            self.attached
        }
    }

    impl EventEmitter for FakeListener {
        fn emit(&mut self, event: DeepLinkEvent) {
            self.events.push(event);
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeContext {
        pub launch_url: Option<String>,
        pub fail: bool,
    }

    impl FakeContext {
        pub fn with_url(url: &str) -> Self {
            Self {
                launch_url: Some(url.into()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                launch_url: None,
                fail: true,
            }
        }
    }

    impl ActivationContext for FakeContext {
        fn take_launch_url(&mut self) -> Result<Option<String>, DeepLinkRetrievalError> {
            if self.fail {
                return Err(DeepLinkRetrievalError::new("activity unavailable"));
            }
            Ok(self.launch_url.take())
        }
    }
}
