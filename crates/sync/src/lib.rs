//! Mute synchronization between the front node and backend processes.
//!
//! The front node runs a [`MuteSyncCommunicator`] that turns committed mute
//! log entries into [`MuteData`] frames. Backends run a [`MuteSyncListener`]
//! that applies them to a [`BackendMuteCache`]. Delivery is at-most-once and
//! unordered; every message is idempotent, and RESET or a fresh ADD on the
//! next connect repairs anything that was lost.

pub mod cache;
pub mod channel;
pub mod communicator;
pub mod listener;
pub mod protocol;

pub use cache::{BackendMuteCache, CachedMute, ChatDecision};
pub use channel::{LocalMuteChannel, MuteChannel, RedisMuteChannel};
pub use communicator::{DEFAULT_PENDING_LIMIT, MuteSyncCommunicator, mute_data_for};
pub use listener::MuteSyncListener;
pub use protocol::{MAX_PAYLOAD_LEN, MuteData, MuteDataKind, PROTOCOL_VERSION};
