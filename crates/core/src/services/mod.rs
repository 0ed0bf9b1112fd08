//! Services driving punishments through their lifecycle.

pub mod punishment;

pub use punishment::{ChangeInput, PunishmentService};
