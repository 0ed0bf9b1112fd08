//! Database repositories.

mod punishment;
mod punishment_log;

pub use punishment::PunishmentRepository;
pub use punishment_log::PunishmentLogRepository;
