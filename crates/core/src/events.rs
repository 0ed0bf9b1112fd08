//! Punishment events and their dispatcher.
//!
//! Events form a closed set ([`PunishmentEvent`]). Listeners are registered per
//! [`EventKind`] and receive a mutable [`EventEnvelope`]. Cancellation is a flag
//! on the envelope; it can only be raised while the envelope is being
//! dispatched and only for cancellable kinds.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::log::PunishmentLogEntry;
use crate::punishment::Punishment;

/// Something that happened to a punishment.
#[derive(Debug, Clone)]
pub enum PunishmentEvent {
    /// A punishment became active.
    Issued {
        /// The active punishment.
        punishment: Punishment,
    },
    /// A punishment is about to be replaced by a revision.
    Changed {
        /// The revision being superseded.
        old: Punishment,
        /// The revision taking over.
        new: Punishment,
    },
    /// A punishment is about to be cancelled.
    Cancelled {
        /// The punishment, still active.
        punishment: Punishment,
    },
    /// An entry was appended to a punishment log. Fired after the state change committed.
    LogEntryCreated {
        /// The appended entry.
        entry: PunishmentLogEntry,
    },
}

impl PunishmentEvent {
    /// Tag used to look up listeners.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Issued { .. } => EventKind::Issued,
            Self::Changed { .. } => EventKind::Changed,
            Self::Cancelled { .. } => EventKind::Cancelled,
            Self::LogEntryCreated { .. } => EventKind::LogEntryCreated,
        }
    }
}

/// Event tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`PunishmentEvent::Issued`].
    Issued,
    /// See [`PunishmentEvent::Changed`].
    Changed,
    /// See [`PunishmentEvent::Cancelled`].
    Cancelled,
    /// See [`PunishmentEvent::LogEntryCreated`].
    LogEntryCreated,
}

impl EventKind {
    /// Whether listeners may veto events of this kind.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Changed | Self::Cancelled)
    }
}

/// An event together with its dispatch state.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    event: PunishmentEvent,
    cancelled: bool,
    dispatching: bool,
}

impl EventEnvelope {
    fn new(event: PunishmentEvent) -> Self {
        Self {
            event,
            cancelled: false,
            dispatching: false,
        }
    }

    /// The wrapped event.
    #[must_use]
    pub const fn event(&self) -> &PunishmentEvent {
        &self.event
    }

    /// Unwrap the event.
    #[must_use]
    pub fn into_event(self) -> PunishmentEvent {
        self.event
    }

    /// Veto the operation. Sticky: later listeners still run and cannot undo it.
    ///
    /// Returns whether the veto was recorded. It is ignored outside of a
    /// dispatch and for events that cannot be cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.dispatching && self.event.kind().is_cancellable() {
            self.cancelled = true;
        }
        self.cancelled
    }

    /// Whether a listener vetoed the operation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Failure raised by a listener.
pub type ListenerResult = anyhow::Result<()>;

type Listener = Arc<dyn Fn(&mut EventEnvelope) -> ListenerResult + Send + Sync>;

/// Outcome of a dispatch.
#[derive(Debug)]
pub struct Dispatched {
    envelope: EventEnvelope,
    error: Option<anyhow::Error>,
}

impl Dispatched {
    /// Whether a listener vetoed the operation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.envelope.is_cancelled()
    }

    /// The first listener failure, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    /// The envelope after every listener ran.
    #[must_use]
    pub const fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    /// Split into the envelope and the first listener failure.
    #[must_use]
    pub fn into_parts(self) -> (EventEnvelope, Option<anyhow::Error>) {
        (self.envelope, self.error)
    }
}

/// In-process event bus.
///
/// Registration is append-only. Dispatch runs synchronously on the calling
/// thread and may be invoked from any task.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Arc<RwLock<HashMap<EventKind, Vec<Listener>>>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind. Listeners run in registration order.
    pub fn register<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&mut EventEnvelope) -> ListenerResult + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Run every listener registered for the event's kind.
    ///
    /// A failing or panicking listener does not stop the ones after it; the
    /// first failure is returned once all listeners have run.
    pub fn dispatch(&self, event: PunishmentEvent) -> Dispatched {
        let kind = event.kind();
        // Listeners may register further listeners, so the lock is not held while they run.
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut envelope = EventEnvelope::new(event);
        envelope.dispatching = true;
        let mut first_error = None;

        for (index, listener) in listeners.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(&mut envelope)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(payload) => anyhow::anyhow!("listener panicked: {}", panic_message(&*payload)),
            };

            warn!(event = ?kind, listener = index, error = %error, "Event listener failed");
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        envelope.dispatching = false;
        Dispatched {
            envelope,
            error: first_error,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
