//! Punishment engine for warden.
//!
//! Punishments move through a small state machine
//! ([`punishment`]), every transition is announced through the
//! [`EventDispatcher`] and recorded in a per-punishment [`PunishmentLog`].
//! [`PunishmentService`] ties these together with persistence.

pub mod duration;
pub mod events;
pub mod log;
pub mod punishment;
pub mod registry;
pub mod services;
pub mod store;
pub mod template;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use duration::{PunishmentDuration, StringRepresentation};
pub use events::{Dispatched, EventDispatcher, EventEnvelope, EventKind, ListenerResult, PunishmentEvent};
pub use log::{PunishmentLog, PunishmentLogEntry};
pub use punishment::{NewPunishment, Punishment};
pub use registry::PunishmentRegistry;
pub use services::*;
pub use store::{
    InMemoryUserResolver, PunishmentLogStore, PunishmentLookup, PunishmentStore, UserHandle,
    UserResolver,
};
pub use template::{PunishmentTemplate, TemplateStage};
pub use warden_db::entities::{LogAction, PunishmentKind, PunishmentState};
