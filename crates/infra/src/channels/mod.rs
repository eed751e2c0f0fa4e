//! Read-only view of the channels the ledger serves.
//!
//! Channels and legal entities are owned by the web layer; the ledger only
//! reads `{id, legal_entity_id, is_deleted}`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use adledger_core::{ChannelId, LegalEntityId};

use crate::error::LedgerError;

pub mod postgres;

pub use postgres::PostgresChannelDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub legal_entity_id: Option<LegalEntityId>,
    /// Soft-deleted channels always read as a zero balance.
    pub is_deleted: bool,
}

impl Channel {
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            legal_entity_id: None,
            is_deleted: false,
        }
    }

    pub fn owned_by(mut self, legal_entity_id: LegalEntityId) -> Self {
        self.legal_entity_id = Some(legal_entity_id);
        self
    }
}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, LedgerError>;

    /// Known channels among `ids` (unknown ids are skipped).
    async fn channels(&self, ids: &[ChannelId]) -> Result<Vec<Channel>, LedgerError>;

    /// Non-deleted channels of a legal entity.
    async fn legal_entity_channels(
        &self,
        legal_entity_id: LegalEntityId,
    ) -> Result<Vec<Channel>, LedgerError>;
}

#[async_trait]
impl<D> ChannelDirectory for Arc<D>
where
    D: ChannelDirectory + ?Sized,
{
    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, LedgerError> {
        (**self).channel(id).await
    }

    async fn channels(&self, ids: &[ChannelId]) -> Result<Vec<Channel>, LedgerError> {
        (**self).channels(ids).await
    }

    async fn legal_entity_channels(
        &self,
        legal_entity_id: LegalEntityId,
    ) -> Result<Vec<Channel>, LedgerError> {
        (**self).legal_entity_channels(legal_entity_id).await
    }
}

/// In-memory channel directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryChannelDirectory {
    inner: RwLock<HashMap<ChannelId, Channel>>,
}

impl InMemoryChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, channel: Channel) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(channel.id, channel);
        }
    }

    /// Flag a channel as soft-deleted. Returns false if it is unknown.
    pub fn soft_delete(&self, id: ChannelId) -> bool {
        match self.inner.write() {
            Ok(mut map) => match map.get_mut(&id) {
                Some(c) => {
                    c.is_deleted = true;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ChannelDirectory for InMemoryChannelDirectory {
    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, LedgerError> {
        let map = self.inner.read().map_err(|_| LedgerError::poisoned())?;
        Ok(map.get(&id).copied())
    }

    async fn channels(&self, ids: &[ChannelId]) -> Result<Vec<Channel>, LedgerError> {
        let map = self.inner.read().map_err(|_| LedgerError::poisoned())?;
        Ok(ids.iter().filter_map(|id| map.get(id).copied()).collect())
    }

    async fn legal_entity_channels(
        &self,
        legal_entity_id: LegalEntityId,
    ) -> Result<Vec<Channel>, LedgerError> {
        let map = self.inner.read().map_err(|_| LedgerError::poisoned())?;
        let mut channels: Vec<Channel> = map
            .values()
            .filter(|c| c.legal_entity_id == Some(legal_entity_id) && !c.is_deleted)
            .copied()
            .collect();
        channels.sort_by_key(|c| c.id);
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn legal_entity_listing_skips_deleted_channels() {
        let dir = InMemoryChannelDirectory::new();
        let le = LegalEntityId::new();
        let live = Channel::new(ChannelId::new()).owned_by(le);
        let gone = Channel::new(ChannelId::new()).owned_by(le);
        let foreign = Channel::new(ChannelId::new()).owned_by(LegalEntityId::new());
        for c in [live, gone, foreign] {
            dir.upsert(c);
        }
        assert!(dir.soft_delete(gone.id));

        let listed = dir.legal_entity_channels(le).await.unwrap();
        assert_eq!(listed, vec![live]);
    }

    #[tokio::test]
    async fn unknown_ids_are_skipped_in_bulk_lookup() {
        let dir = InMemoryChannelDirectory::new();
        let known = Channel::new(ChannelId::new());
        dir.upsert(known);

        let found = dir.channels(&[known.id, ChannelId::new()]).await.unwrap();
        assert_eq!(found, vec![known]);
        assert!(!dir.soft_delete(ChannelId::new()));
    }
}
