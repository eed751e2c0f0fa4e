//! Postgres-backed channel directory over the web layer's `channels` table.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use adledger_core::{ChannelId, LegalEntityId};

use super::{Channel, ChannelDirectory};
use crate::error::{LedgerError, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresChannelDirectory {
    pool: Arc<PgPool>,
}

impl PostgresChannelDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ChannelDirectory for PostgresChannelDirectory {
    #[instrument(skip(self), fields(channel_id = %id), err)]
    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, LedgerError> {
        let row = sqlx::query("SELECT id, legal_entity_id, is_deleted FROM channels WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_channel", e))?;

        row.as_ref().map(channel_from_row).transpose()
    }

    #[instrument(skip(self, ids), fields(channel_count = ids.len()), err)]
    async fn channels(&self, ids: &[ChannelId]) -> Result<Vec<Channel>, LedgerError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = ids.iter().map(|c| *c.as_uuid()).collect();

        let rows = sqlx::query(
            "SELECT id, legal_entity_id, is_deleted FROM channels WHERE id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_channels", e))?;

        rows.iter().map(channel_from_row).collect()
    }

    #[instrument(skip(self), fields(legal_entity_id = %legal_entity_id), err)]
    async fn legal_entity_channels(
        &self,
        legal_entity_id: LegalEntityId,
    ) -> Result<Vec<Channel>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, legal_entity_id, is_deleted
            FROM channels
            WHERE legal_entity_id = $1 AND NOT is_deleted
            ORDER BY id
            "#,
        )
        .bind(legal_entity_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("legal_entity_channels", e))?;

        rows.iter().map(channel_from_row).collect()
    }
}

fn channel_from_row(row: &PgRow) -> Result<Channel, LedgerError> {
    let read = |e: sqlx::Error| map_sqlx_error("read_channel", e);
    let legal_entity_id: Option<Uuid> = row.try_get("legal_entity_id").map_err(read)?;

    Ok(Channel {
        id: ChannelId::from_uuid(row.try_get("id").map_err(read)?),
        legal_entity_id: legal_entity_id.map(LegalEntityId::from_uuid),
        is_deleted: row.try_get("is_deleted").map_err(read)?,
    })
}
