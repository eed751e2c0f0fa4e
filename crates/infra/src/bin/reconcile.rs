//! Reconciliation sweep: report every transaction group whose debits and
//! credits disagree. Exits non-zero when any are found.

use std::process::ExitCode;

use anyhow::Context;

use adledger_infra::channels::PostgresChannelDirectory;
use adledger_infra::store::postgres::{connect, migrate};
use adledger_infra::store::PostgresLedgerStore;
use adledger_infra::{InMemoryBalanceCache, LedgerConfig, LedgerService, ServiceSettings};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    adledger_observability::init();

    let config = LedgerConfig::from_env().context("loading ledger configuration")?;
    let pool = connect(&config).await.context("connecting to the ledger database")?;
    migrate(&pool).await.context("applying ledger migrations")?;

    let service = LedgerService::new(
        PostgresLedgerStore::new(pool.clone()),
        PostgresChannelDirectory::new(pool),
        InMemoryBalanceCache::new(),
        ServiceSettings::from(&config),
    );

    let unbalanced = service
        .find_unbalanced_transactions()
        .await
        .context("scanning transaction groups")?;

    if unbalanced.is_empty() {
        tracing::info!("ledger reconciled: all transaction groups balance");
        return Ok(ExitCode::SUCCESS);
    }

    for transaction_id in &unbalanced {
        let entries = service.transaction_entries(*transaction_id).await?;
        tracing::error!(
            transaction_id = %transaction_id,
            entry_count = entries.len(),
            "unbalanced transaction group"
        );
    }
    Ok(ExitCode::FAILURE)
}
