//! Database entities.

#![allow(missing_docs)]

pub mod punishment;
pub mod punishment_log;

pub use punishment::{Entity as Punishment, PunishmentKind, PunishmentState};
pub use punishment_log::{Entity as PunishmentLog, LogAction};
