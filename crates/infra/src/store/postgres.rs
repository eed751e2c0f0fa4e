//! Postgres-backed ledger store.
//!
//! Accounts live in `ledger_accounts`, entries in the insert-only
//! `ledger_entries` table (see `migrations/`). A `BEFORE UPDATE OR DELETE`
//! trigger on `ledger_entries` backs up the access-layer immutability guard.
//!
//! ## Concurrency
//!
//! `post()` runs in one transaction at READ COMMITTED:
//!
//! 1. Ensure the channel's four accounts exist (`INSERT ... ON CONFLICT DO NOTHING`)
//! 2. `SELECT ... FOR UPDATE` the channel's account rows, ordered by id
//! 3. Sum CASH and FROZEN entries (each statement sees everything committed
//!    before the lock was granted)
//! 4. Evaluate the posting's precondition
//! 5. Insert the entries and commit
//!
//! Two concurrent freezes or payouts against one channel therefore serialize on
//! step 2, and the second one sees the first one's entries in step 3.
//!
//! ## Thread Safety
//!
//! `PostgresLedgerStore` is `Send + Sync` and can be shared across tasks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use adledger_accounting::{
    Account, AccountKind, AccountSums, ChannelAccounts, ChannelBalance, EntrySide, LedgerEntry,
    Metadata, Posting, TransactionKind,
};
use adledger_core::{AccountId, ChannelId, Currency, EntryId, TransactionId};

use super::LedgerStore;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, map_sqlx_error};

const ENTRY_COLUMNS: &str = r#"
    e.id,
    e.account_id,
    e.amount,
    e.side,
    e.transaction_id,
    e.transaction_kind,
    e.description,
    e.source_kind,
    e.source_id,
    e.metadata,
    e.created_at
"#;

/// Open a connection pool sized from configuration.
pub async fn connect(config: &LedgerConfig) -> Result<PgPool, LedgerError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the bundled schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), LedgerError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| LedgerError::Store(format!("migration failed: {e}")))
}

/// Postgres-backed append-only ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(channel_id = %channel_id, currency = %currency), err)]
    async fn ensure_accounts(
        &self,
        channel_id: ChannelId,
        currency: &Currency,
    ) -> Result<ChannelAccounts, LedgerError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        ensure_accounts_in(&mut conn, channel_id, currency).await
    }

    #[instrument(skip(self, channel_ids), fields(channel_count = channel_ids.len()), err)]
    async fn find_accounts(
        &self,
        channel_ids: &[ChannelId],
        currency: &Currency,
    ) -> Result<Vec<Account>, LedgerError> {
        if channel_ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = channel_ids.iter().map(|c| *c.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, channel_id, kind, currency, created_at
            FROM ledger_accounts
            WHERE channel_id = ANY($1) AND currency = $2
            "#,
        )
        .bind(&ids)
        .bind(currency.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_accounts", e))?;

        rows.iter().map(account_from_row).collect()
    }

    #[instrument(skip(self, account_ids), fields(account_count = account_ids.len()), err)]
    async fn account_sums(
        &self,
        account_ids: &[AccountId],
    ) -> Result<HashMap<AccountId, AccountSums>, LedgerError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        account_sums_in(&mut conn, account_ids).await
    }

    #[instrument(
        skip(self, posting),
        fields(
            channel_id = %posting.channel_id,
            transaction_id = %posting.transaction_id,
            kind = %posting.kind(),
            amount = %posting.amount,
            committed_entries = tracing::field::Empty
        ),
        err
    )]
    async fn post(&self, posting: &Posting) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let accounts = ensure_accounts_in(&mut tx, posting.channel_id, &posting.currency).await?;

        sqlx::query(
            r#"
            SELECT id
            FROM ledger_accounts
            WHERE channel_id = $1 AND currency = $2
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(posting.channel_id.as_uuid())
        .bind(posting.currency.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_accounts", e))?;

        let sums = account_sums_in(&mut tx, &[accounts.cash.id, accounts.frozen.id]).await?;
        let current = ChannelBalance::derive(
            sums.get(&accounts.cash.id).copied().unwrap_or_default(),
            sums.get(&accounts.frozen.id).copied().unwrap_or_default(),
        );

        let entries = match posting
            .authorize(&current)
            .and_then(|_| posting.entries(&accounts, Utc::now()))
        {
            Ok(entries) => entries,
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(e.into());
            }
        };

        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (
                    id,
                    account_id,
                    amount,
                    side,
                    transaction_id,
                    transaction_kind,
                    description,
                    source_kind,
                    source_id,
                    metadata,
                    created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.account_id.as_uuid())
            .bind(entry.amount)
            .bind(entry.side.as_str())
            .bind(entry.transaction_id.as_uuid())
            .bind(entry.transaction_kind.as_str())
            .bind(&entry.description)
            .bind(entry.source_kind.as_deref())
            .bind(entry.source_id.as_deref())
            .bind(serde_json::Value::Object(entry.metadata.clone()))
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_entry", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_entries", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self), fields(transaction_id = %transaction_id), err)]
    async fn transaction_entries(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries e
            WHERE e.transaction_id = $1
            ORDER BY e.created_at ASC, e.id ASC
            "#
        ))
        .bind(transaction_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transaction_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), fields(channel_id = %channel_id), err)]
    async fn channel_entries(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries e
            JOIN ledger_accounts a ON a.id = e.account_id
            WHERE a.channel_id = $1
            ORDER BY e.created_at DESC, e.id DESC
            LIMIT $2
            "#
        ))
        .bind(channel_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("channel_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn unbalanced_transactions(&self) -> Result<Vec<TransactionId>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id
            FROM ledger_entries
            GROUP BY transaction_id
            HAVING COUNT(*) < 2
                OR SUM(CASE WHEN side = 'DEBIT' THEN amount ELSE -amount END) <> 0
            ORDER BY transaction_id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unbalanced_transactions", e))?;

        rows.iter()
            .map(|r| {
                r.try_get::<Uuid, _>("transaction_id")
                    .map(TransactionId::from_uuid)
                    .map_err(|e| map_sqlx_error("read_transaction_id", e))
            })
            .collect()
    }
}

async fn ensure_accounts_in(
    conn: &mut PgConnection,
    channel_id: ChannelId,
    currency: &Currency,
) -> Result<ChannelAccounts, LedgerError> {
    let ids: Vec<Uuid> = AccountKind::ALL.iter().map(|_| *AccountId::new().as_uuid()).collect();
    let kinds: Vec<&str> = AccountKind::ALL.iter().map(|k| k.as_str()).collect();

    sqlx::query(
        r#"
        INSERT INTO ledger_accounts (id, channel_id, kind, currency)
        SELECT u.id, $1, u.kind, $2
        FROM UNNEST($3::uuid[], $4::text[]) AS u(id, kind)
        ON CONFLICT (channel_id, kind, currency) DO NOTHING
        "#,
    )
    .bind(channel_id.as_uuid())
    .bind(currency.as_str())
    .bind(&ids)
    .bind(&kinds)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("ensure_accounts", e))?;

    let rows = sqlx::query(
        r#"
        SELECT id, channel_id, kind, currency, created_at
        FROM ledger_accounts
        WHERE channel_id = $1 AND currency = $2
        "#,
    )
    .bind(channel_id.as_uuid())
    .bind(currency.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_accounts", e))?;

    let accounts = rows.iter().map(account_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok(ChannelAccounts::from_accounts(accounts)?)
}

async fn account_sums_in(
    conn: &mut PgConnection,
    account_ids: &[AccountId],
) -> Result<HashMap<AccountId, AccountSums>, LedgerError> {
    if account_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let ids: Vec<Uuid> = account_ids.iter().map(|a| *a.as_uuid()).collect();

    let rows = sqlx::query(
        r#"
        SELECT
            account_id,
            COALESCE(SUM(amount) FILTER (WHERE side = 'DEBIT'), 0) AS debits,
            COALESCE(SUM(amount) FILTER (WHERE side = 'CREDIT'), 0) AS credits
        FROM ledger_entries
        WHERE account_id = ANY($1)
        GROUP BY account_id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("account_sums", e))?;

    let mut sums = HashMap::with_capacity(rows.len());
    for row in rows {
        let read = |e: sqlx::Error| map_sqlx_error("read_account_sums", e);
        let account_id: Uuid = row.try_get("account_id").map_err(read)?;
        let debits: Decimal = row.try_get("debits").map_err(read)?;
        let credits: Decimal = row.try_get("credits").map_err(read)?;
        sums.insert(AccountId::from_uuid(account_id), AccountSums::new(debits, credits));
    }
    Ok(sums)
}

fn account_from_row(row: &PgRow) -> Result<Account, LedgerError> {
    let read = |e: sqlx::Error| map_sqlx_error("read_account", e);
    let kind: String = row.try_get("kind").map_err(read)?;
    let currency: String = row.try_get("currency").map_err(read)?;

    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id").map_err(read)?),
        channel_id: ChannelId::from_uuid(row.try_get("channel_id").map_err(read)?),
        kind: kind.parse()?,
        currency: Currency::new(currency)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(read)?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, LedgerError> {
    let read = |e: sqlx::Error| map_sqlx_error("read_entry", e);
    let side: String = row.try_get("side").map_err(read)?;
    let kind: String = row.try_get("transaction_kind").map_err(read)?;
    let metadata: Option<serde_json::Value> = row.try_get("metadata").map_err(read)?;

    Ok(LedgerEntry {
        id: EntryId::from_uuid(row.try_get("id").map_err(read)?),
        account_id: AccountId::from_uuid(row.try_get("account_id").map_err(read)?),
        amount: row.try_get::<Decimal, _>("amount").map_err(read)?,
        side: side.parse::<EntrySide>()?,
        transaction_id: TransactionId::from_uuid(row.try_get("transaction_id").map_err(read)?),
        transaction_kind: kind.parse::<TransactionKind>()?,
        description: row.try_get("description").map_err(read)?,
        source_kind: row.try_get("source_kind").map_err(read)?,
        source_id: row.try_get("source_id").map_err(read)?,
        metadata: match metadata {
            Some(serde_json::Value::Object(map)) => map,
            _ => Metadata::new(),
        },
        created_at: row.try_get("created_at").map_err(read)?,
    })
}
