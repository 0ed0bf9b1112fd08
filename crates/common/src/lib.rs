//! Common utilities and shared types for warden.
//!
//! This crate provides foundational components used across all warden crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: UUID-based punishment identifiers via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use warden_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id = IdGenerator::new().generate();
//!     println!("{} issues punishment {}", config.node.name, id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;

pub use config::{
    Config, DatabaseConfig, NodeConfig, NodeRole, PunishmentConfig, RedisConfig,
};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
