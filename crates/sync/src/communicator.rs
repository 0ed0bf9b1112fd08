//! Front-node side of mute sync.
//!
//! Mute changes are picked up from committed log entries, so vetoed
//! operations never reach a backend. Messages are handed to a sender task;
//! frames that fail to publish wait in a bounded queue until the next
//! [`MuteSyncCommunicator::flush_pending`].

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_common::AppResult;
use warden_core::{EventKind, LogAction, PunishmentEvent, PunishmentLogEntry, PunishmentService};

use crate::channel::MuteChannel;
use crate::protocol::MuteData;

/// Default number of undelivered frames kept for retry.
pub const DEFAULT_PENDING_LIMIT: usize = 1024;

/// Publishes mute state changes of the front node.
#[derive(Clone)]
pub struct MuteSyncCommunicator {
    service: PunishmentService,
    channel: Arc<dyn MuteChannel>,
    tx: mpsc::UnboundedSender<MuteData>,
    pending: Arc<Mutex<VecDeque<Bytes>>>,
    pending_limit: usize,
}

impl MuteSyncCommunicator {
    /// Start the sender task and hook into the service's log events.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        service: PunishmentService,
        channel: Arc<dyn MuteChannel>,
        pending_limit: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(VecDeque::new()));

        tokio::spawn(run_sender(rx, channel.clone(), pending.clone(), pending_limit));

        let listener_tx = tx.clone();
        service
            .dispatcher()
            .register(EventKind::LogEntryCreated, move |envelope| {
                let PunishmentEvent::LogEntryCreated { entry } = envelope.event() else {
                    return Ok(());
                };
                if let Some(data) = mute_data_for(entry) {
                    listener_tx
                        .send(data)
                        .map_err(|_| anyhow::anyhow!("mute sync sender has stopped"))?;
                }
                Ok(())
            });

        info!(pending_limit, "Mute sync communicator started");
        Self {
            service,
            channel,
            tx,
            pending,
            pending_limit,
        }
    }

    /// Announce the ongoing mutes of a player who just connected.
    ///
    /// Sends one ADD per ongoing mute, or a RESET when there is none. Frames
    /// left over from earlier failures are retried first. Returns the number
    /// of messages queued.
    pub async fn on_player_connect(&self, user_id: Uuid) -> AppResult<usize> {
        self.flush_pending().await;

        let mutes = self.service.ongoing_mutes(user_id).await?;
        if mutes.is_empty() {
            self.queue(MuteData::reset(user_id));
            return Ok(1);
        }

        for mute in &mutes {
            self.queue(MuteData::add(
                user_id,
                mute.id(),
                mute.reason(),
                mute.duration(),
            ));
        }
        debug!(user_id = %user_id, mutes = mutes.len(), "Announced ongoing mutes");
        Ok(mutes.len())
    }

    /// Clear a departing player from every backend cache.
    pub fn on_player_disconnect(&self, user_id: Uuid) {
        self.queue(MuteData::reset(user_id));
    }

    /// Retry frames that failed to publish, oldest first.
    ///
    /// Stops at the first failure and keeps the rest. Returns how many frames
    /// were delivered.
    pub async fn flush_pending(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let mut delivered = 0;
        while let Some(frame) = pending.pop_front() {
            if let Err(e) = self.channel.publish(frame.clone()).await {
                warn!(error = %e, left = pending.len() + 1, "Mute sync retry failed");
                pending.push_front(frame);
                break;
            }
            delivered += 1;
        }
        if delivered > 0 {
            info!(delivered, "Delivered pending mute sync frames");
        }
        delivered
    }

    /// Number of frames waiting for a retry.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Capacity of the retry queue.
    #[must_use]
    pub const fn pending_limit(&self) -> usize {
        self.pending_limit
    }

    fn queue(&self, data: MuteData) {
        if self.tx.send(data).is_err() {
            error!("Mute sync sender has stopped");
        }
    }
}

/// Message a backend needs for a committed log entry, if any.
///
/// Only mutes are synced. A change produces one UPDATE, taken from the entry
/// of the new revision.
#[must_use]
pub fn mute_data_for(entry: &PunishmentLogEntry) -> Option<MuteData> {
    if !entry.kind.is_mute() {
        return None;
    }

    match entry.action {
        LogAction::Issue => Some(MuteData::add(
            entry.user_id,
            entry.punishment_id,
            entry.reason.as_str(),
            entry.duration,
        )),
        LogAction::Cancel | LogAction::Expire => {
            Some(MuteData::remove(entry.user_id, entry.punishment_id))
        }
        LogAction::Change if entry.successor.is_none() && entry.predecessor.is_some() => {
            Some(MuteData::update(
                entry.user_id,
                entry.punishment_id,
                entry.predecessor,
                entry.reason.as_str(),
                entry.duration,
            ))
        }
        LogAction::Change | LogAction::System => None,
    }
}

async fn run_sender(
    mut rx: mpsc::UnboundedReceiver<MuteData>,
    channel: Arc<dyn MuteChannel>,
    pending: Arc<Mutex<VecDeque<Bytes>>>,
    pending_limit: usize,
) {
    while let Some(data) = rx.recv().await {
        let frame = match data.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(user_id = %data.uuid, error = %e, "Dropping unencodable mute data");
                continue;
            }
        };

        if let Err(e) = channel.publish(frame.clone()).await {
            warn!(user_id = %data.uuid, kind = ?data.kind, error = %e, "Mute sync publish failed");
            let mut pending = pending.lock().await;
            if pending_limit == 0 {
                continue;
            }
            if pending.len() >= pending_limit {
                pending.pop_front();
                warn!(pending_limit, "Mute sync retry queue full, dropped oldest frame");
            }
            pending.push_back(frame);
        }
    }
    info!("Mute sync sender stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_core::{PunishmentDuration, PunishmentKind};

    use crate::protocol::MuteDataKind;

    fn entry(kind: PunishmentKind, action: LogAction) -> PunishmentLogEntry {
        PunishmentLogEntry {
            sequence: 0,
            punishment_id: Uuid::new_v4(),
            actor: None,
            action,
            message: String::new(),
            user_id: Uuid::new_v4(),
            kind,
            reason: "Spam".to_string(),
            duration: PunishmentDuration::of_millis(600_000),
            predecessor: None,
            successor: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_issue_maps_to_add() {
        let entry = entry(PunishmentKind::Mute, LogAction::Issue);
        let data = mute_data_for(&entry).unwrap();
        assert_eq!(data.kind, MuteDataKind::Add);
        assert_eq!(data.punishment_id, Some(entry.punishment_id));
        assert_eq!(data.expiration, entry.duration.expiration_millis());
    }

    #[test]
    fn test_cancel_and_expire_map_to_remove() {
        for action in [LogAction::Cancel, LogAction::Expire] {
            let data = mute_data_for(&entry(PunishmentKind::PermanentMute, action)).unwrap();
            assert_eq!(data.kind, MuteDataKind::Remove);
        }
    }

    #[test]
    fn test_change_maps_only_new_revision() {
        let mut old = entry(PunishmentKind::Mute, LogAction::Change);
        old.successor = Some(Uuid::new_v4());
        assert!(mute_data_for(&old).is_none());

        let mut new = entry(PunishmentKind::Mute, LogAction::Change);
        new.predecessor = Some(Uuid::new_v4());
        let data = mute_data_for(&new).unwrap();
        assert_eq!(data.kind, MuteDataKind::Update);
        assert_eq!(data.predecessor_id, new.predecessor);
    }

    #[test]
    fn test_non_mutes_are_ignored() {
        assert!(mute_data_for(&entry(PunishmentKind::Ban, LogAction::Issue)).is_none());
        assert!(mute_data_for(&entry(PunishmentKind::Mute, LogAction::System)).is_none());
    }
}
