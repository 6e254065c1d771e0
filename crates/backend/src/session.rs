//! Session Store (A, §4.1): in-process storage of sessions and their message
//! history, with inactivity-based reaping. One `DashMap` entry per session holds
//! both the session envelope and its history together, so `append_message` updates
//! `message_count` and the history vector under the same shard lock — the two never
//! drift apart (§8 "session count/history coherence").

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_core::{ErrorAggregator, ErrorKind, Message};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: usize,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            last_message_at: None,
            message_count: 0,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

struct SessionRecord {
    session: Session,
    history: Vec<Message>,
    /// Error aggregation (§4.4) scoped to this session alone, so a burst on one
    /// user's turn can never inflate another's `repeat_count` (§5: only the
    /// Session Store is shared cross-connection state).
    errors: ErrorAggregator,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("session already exists")]
    AlreadyExists,
    #[error("session not found")]
    NotFound,
}

pub struct SessionStore {
    sessions: Arc<DashMap<Uuid, SessionRecord>>,
    inactivity_threshold: StdDuration,
}

impl SessionStore {
    pub fn new(inactivity_threshold: StdDuration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            inactivity_threshold,
        }
    }

    pub fn create(&self, session: Session) -> Result<(), StoreError> {
        match self.sessions.entry(session.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(SessionRecord {
                    session,
                    history: Vec::new(),
                    errors: ErrorAggregator::default(),
                });
                Ok(())
            }
        }
    }

    pub fn find(&self, id: Uuid) -> Option<Session> {
        self.sessions.get(&id).map(|r| r.session.clone())
    }

    pub fn list(&self) -> Vec<Session> {
        self.sessions.iter().map(|r| r.session.clone()).collect()
    }

    pub fn update(&self, session: Session) -> Result<(), StoreError> {
        let mut entry = self.sessions.get_mut(&session.id).ok_or(StoreError::NotFound)?;
        entry.session = session;
        Ok(())
    }

    pub fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.sessions.remove(&id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    /// Appends `msg` to its session's history and updates the session envelope in
    /// the same critical section (§4.1 atomicity requirement).
    pub fn append_message(&self, msg: Message) -> Result<(), StoreError> {
        let mut entry = self
            .sessions
            .get_mut(&msg.session_id)
            .ok_or(StoreError::NotFound)?;
        entry.session.last_message_at = Some(msg.timestamp);
        entry.history.push(msg);
        entry.session.message_count = entry.history.len();
        Ok(())
    }

    pub fn get_messages(&self, session_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.sessions
            .get(&session_id)
            .map(|r| r.history.clone())
            .ok_or(StoreError::NotFound)
    }

    /// Records one occurrence of `kind` against `session_id`'s own aggregation
    /// window (§4.4) and returns the running count, so a burst of the same code
    /// within one session's turns is reported once with a count instead of N
    /// duplicate error frames.
    pub fn record_error(&self, session_id: Uuid, kind: ErrorKind) -> Result<usize, StoreError> {
        self.sessions
            .get(&session_id)
            .map(|r| r.errors.record(kind))
            .ok_or(StoreError::NotFound)
    }

    pub fn is_expired(&self, session: &Session) -> bool {
        let reference = session.last_message_at.unwrap_or(session.created_at);
        let age = Utc::now().signed_duration_since(reference);
        age.to_std().map(|a| a > self.inactivity_threshold).unwrap_or(false)
    }

    pub fn inactivity_threshold(&self) -> StdDuration {
        self.inactivity_threshold
    }

    fn reap_expired(&self) -> usize {
        let threshold = self.inactivity_threshold;
        let now = Utc::now();
        let mut removed = 0;
        self.sessions.retain(|_, record| {
            let reference = record.session.last_message_at.unwrap_or(record.session.created_at);
            let expired = now
                .signed_duration_since(reference)
                .to_std()
                .map(|age| age > threshold)
                .unwrap_or(false);
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }
}

/// Spawns the cooperative reaper loop (§4.1 "Background reaper"). Cancel the
/// returned token to stop it; the task exits cleanly without leaking.
pub fn spawn_reaper(
    store: Arc<SessionStore>,
    cadence: StdDuration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("session reaper cancelled, exiting");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = store.reap_expired();
                    if removed > 0 {
                        tracing::info!(removed, "reaped expired sessions");
                    }
                }
            }
        }
    })
}
