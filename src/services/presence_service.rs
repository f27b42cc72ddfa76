//! Presence tracking: which users have at least one live connection to a session.
//!
//! Presence is advisory. Every step touches a single cache key, failures are logged and
//! swallowed, and the participant's online flag is last-writer-wins.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    dao::{cache::EphemeralStore, cache::keys, storage::StorageResult},
    services::session_service::SessionStateManager,
    state::session::{ConnectionStatus, Participant},
};

/// Outcome of a closed connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    /// The user's last connection closed.
    Left {
        /// Session left.
        code: String,
        /// User gone offline.
        user_id: String,
        /// Offline participant row; absent for users who never joined or when the status
        /// write failed.
        participant: Option<Participant>,
    },
    /// Another connection of the user is still live.
    StillPresent {
        /// Session of the closed connection.
        code: String,
        /// User still connected elsewhere.
        user_id: String,
    },
    /// Unknown or already-processed connection, or the store was unreachable.
    Ignored,
}

/// Connection bookkeeping over the ephemeral store, plus a process-local index from
/// connection id to access code.
pub struct PresenceTracker {
    cache: Arc<dyn EphemeralStore>,
    sessions: Arc<SessionStateManager>,
    ttl: Duration,
    connections: DashMap<String, String>,
}

impl PresenceTracker {
    /// Tracker writing presence keys with `ttl`.
    pub fn new(
        cache: Arc<dyn EphemeralStore>,
        sessions: Arc<SessionStateManager>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            sessions,
            ttl,
            connections: DashMap::new(),
        }
    }

    /// Register `connection_id` as the user's latest connection and mark them online.
    pub async fn on_connect(
        &self,
        user_id: &str,
        code: &str,
        connection_id: &str,
    ) -> Option<Participant> {
        self.connections
            .insert(connection_id.to_owned(), code.to_owned());

        if let Err(err) = self.map_connection(user_id, code, connection_id).await {
            warn!(
                code = %code,
                user_id = %user_id,
                connection_id = %connection_id,
                error = %err,
                "failed to record connection"
            );
        }

        match self
            .sessions
            .set_connection_status(code, user_id, ConnectionStatus::Online)
            .await
        {
            Ok(participant) => participant,
            Err(err) => {
                warn!(code = %code, user_id = %user_id, error = %err, "failed to mark participant online");
                None
            }
        }
    }

    /// Forget `connection_id`. The user goes offline only if it was their last connection.
    ///
    /// `code` is used when the connection is not in the local index, e.g. after a restart.
    pub async fn on_disconnect(&self, connection_id: &str, code: Option<&str>) -> PresenceChange {
        let indexed = self
            .connections
            .remove(connection_id)
            .map(|(_, code)| code);
        let Some(code) = indexed.or_else(|| code.map(str::to_owned)) else {
            debug!(connection_id = %connection_id, "disconnect of an unknown connection");
            return PresenceChange::Ignored;
        };

        match self.release(&code, connection_id).await {
            Ok(change) => change,
            Err(err) => {
                warn!(
                    code = %code,
                    connection_id = %connection_id,
                    error = %err,
                    "presence update failed; ignoring disconnect"
                );
                PresenceChange::Ignored
            }
        }
    }

    async fn map_connection(
        &self,
        user_id: &str,
        code: &str,
        connection_id: &str,
    ) -> StorageResult<()> {
        let pointers = keys::user_to_connection(code);
        let reverse = keys::connection_to_user(code);
        self.cache
            .hset(&reverse, connection_id, user_id.to_owned())
            .await?;
        self.cache
            .hset(&pointers, user_id, connection_id.to_owned())
            .await?;
        self.cache.expire(&reverse, self.ttl).await?;
        self.cache.expire(&pointers, self.ttl).await?;
        Ok(())
    }

    async fn release(&self, code: &str, connection_id: &str) -> StorageResult<PresenceChange> {
        let reverse = keys::connection_to_user(code);
        let Some(user_id) = self.cache.hget(&reverse, connection_id).await? else {
            return Ok(PresenceChange::Ignored);
        };
        self.cache.hdel(&reverse, connection_id).await?;

        let pointers = keys::user_to_connection(code);
        if !self
            .cache
            .hdel_if_eq(&pointers, &user_id, connection_id)
            .await?
        {
            // the pointer names another device, or a duplicate disconnect already cleared it
            let pointer = self.cache.hget(&pointers, &user_id).await?;
            return Ok(match pointer {
                Some(_) => PresenceChange::StillPresent {
                    code: code.to_owned(),
                    user_id,
                },
                None => PresenceChange::Ignored,
            });
        }

        if let Some(other) = self.remaining_connection(code, &user_id).await? {
            // an older device is still open: it becomes the canonical one, unless a
            // newer connection already claimed the pointer
            self.cache.hset_nx(&pointers, &user_id, other).await?;
            return Ok(PresenceChange::StillPresent {
                code: code.to_owned(),
                user_id,
            });
        }

        let participant = match self
            .sessions
            .set_connection_status(code, &user_id, ConnectionStatus::Offline)
            .await
        {
            Ok(participant) => participant,
            Err(err) => {
                warn!(code = %code, user_id = %user_id, error = %err, "failed to mark participant offline");
                None
            }
        };
        info!(code = %code, user_id = %user_id, "participant left");
        Ok(PresenceChange::Left {
            code: code.to_owned(),
            user_id,
            participant,
        })
    }

    async fn remaining_connection(
        &self,
        code: &str,
        user_id: &str,
    ) -> StorageResult<Option<String>> {
        let connections = self.cache.hgetall(&keys::connection_to_user(code)).await?;
        Ok(connections
            .into_iter()
            .find_map(|(connection, owner)| (owner == user_id).then_some(connection)))
    }
}
