//! Mute sync wire format.
//!
//! A frame is a 2-byte big-endian payload length followed by that many bytes
//! of UTF-8 JSON:
//!
//! ```text
//! +--------+---------------------------------------------------------------+
//! | len:u16| {"type":0,"uuid":"..","reason":"..","expiration":..,          |
//! |        |  "punishment_id":"..","version":1}                           |
//! +--------+---------------------------------------------------------------+
//! ```
//!
//! `expiration` is epoch milliseconds and `null` for permanent mutes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_common::{AppError, AppResult};
use warden_core::PunishmentDuration;

/// Version written into every message.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// What a message asks the backend cache to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum MuteDataKind {
    /// Insert or replace the mute with the message's punishment id.
    Add,
    /// Drop every entry with the message's punishment id.
    Remove,
    /// Replace reason and duration of a cached mute in place.
    Update,
    /// Drop every entry of the user.
    Reset,
    /// Any code this node does not understand.
    Unknown,
}

impl From<i32> for MuteDataKind {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Add,
            1 => Self::Remove,
            2 => Self::Update,
            3 => Self::Reset,
            _ => Self::Unknown,
        }
    }
}

impl From<MuteDataKind> for i32 {
    fn from(kind: MuteDataKind) -> Self {
        match kind {
            MuteDataKind::Add => 0,
            MuteDataKind::Remove => 1,
            MuteDataKind::Update => 2,
            MuteDataKind::Reset => 3,
            MuteDataKind::Unknown => -1,
        }
    }
}

/// One mute sync message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteData {
    /// Requested cache change.
    #[serde(rename = "type")]
    pub kind: MuteDataKind,
    /// The muted player.
    pub uuid: Uuid,
    /// Reason shown when chat is blocked.
    #[serde(default)]
    pub reason: Option<String>,
    /// Epoch milliseconds, `None` when permanent or not applicable.
    #[serde(default)]
    pub expiration: Option<i64>,
    /// Mute the message refers to. Absent for RESET.
    #[serde(default)]
    pub punishment_id: Option<Uuid>,
    /// Revision an UPDATE replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_id: Option<Uuid>,
    /// Protocol version of the sender.
    #[serde(default = "default_version")]
    pub version: u32,
}

const fn default_version() -> u32 {
    PROTOCOL_VERSION
}

impl MuteData {
    /// A mute became active.
    #[must_use]
    pub fn add(
        user_id: Uuid,
        punishment_id: Uuid,
        reason: impl Into<String>,
        duration: PunishmentDuration,
    ) -> Self {
        Self {
            kind: MuteDataKind::Add,
            uuid: user_id,
            reason: Some(reason.into()),
            expiration: duration.expiration_millis(),
            punishment_id: Some(punishment_id),
            predecessor_id: None,
            version: PROTOCOL_VERSION,
        }
    }

    /// A mute ended.
    #[must_use]
    pub const fn remove(user_id: Uuid, punishment_id: Uuid) -> Self {
        Self {
            kind: MuteDataKind::Remove,
            uuid: user_id,
            reason: None,
            expiration: None,
            punishment_id: Some(punishment_id),
            predecessor_id: None,
            version: PROTOCOL_VERSION,
        }
    }

    /// A mute was replaced by `punishment_id`.
    #[must_use]
    pub fn update(
        user_id: Uuid,
        punishment_id: Uuid,
        predecessor_id: Option<Uuid>,
        reason: impl Into<String>,
        duration: PunishmentDuration,
    ) -> Self {
        Self {
            kind: MuteDataKind::Update,
            uuid: user_id,
            reason: Some(reason.into()),
            expiration: duration.expiration_millis(),
            punishment_id: Some(punishment_id),
            predecessor_id,
            version: PROTOCOL_VERSION,
        }
    }

    /// Forget every mute of the user.
    #[must_use]
    pub const fn reset(user_id: Uuid) -> Self {
        Self {
            kind: MuteDataKind::Reset,
            uuid: user_id,
            reason: None,
            expiration: None,
            punishment_id: None,
            predecessor_id: None,
            version: PROTOCOL_VERSION,
        }
    }

    /// The carried duration. A missing expiration means permanent.
    pub fn duration(&self) -> AppResult<PunishmentDuration> {
        self.expiration
            .map_or(Ok(PunishmentDuration::Permanent), PunishmentDuration::from_timestamp_millis)
    }

    /// The punishment id, required by every kind except RESET.
    pub fn require_punishment_id(&self) -> AppResult<Uuid> {
        self.punishment_id.ok_or_else(|| {
            AppError::InvalidFormat(format!("{:?} message without punishment_id", self.kind))
        })
    }

    /// Serialize into a length-prefixed frame.
    pub fn encode(&self) -> AppResult<Bytes> {
        let payload = serde_json::to_vec(self)?;
        let len = u16::try_from(payload.len()).map_err(|_| {
            AppError::InvalidFormat(format!(
                "mute data payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
                payload.len()
            ))
        })?;

        let mut frame = BytesMut::with_capacity(2 + payload.len());
        frame.put_u16(len);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Parse a length-prefixed frame.
    pub fn decode(mut frame: &[u8]) -> AppResult<Self> {
        if frame.remaining() < 2 {
            return Err(AppError::InvalidFormat(
                "mute data frame is shorter than its length prefix".to_string(),
            ));
        }
        let len = usize::from(frame.get_u16());
        if frame.remaining() != len {
            return Err(AppError::InvalidFormat(format!(
                "mute data frame announces {len} bytes but carries {}",
                frame.remaining()
            )));
        }

        let payload = std::str::from_utf8(frame)
            .map_err(|e| AppError::InvalidFormat(format!("mute data is not UTF-8: {e}")))?;
        Ok(serde_json::from_str(payload)?)
    }
}
