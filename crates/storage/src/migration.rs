use sea_orm::sea_query::{ColumnDef, Expr, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{deposits, monitor_state};
use deposit_tracker_domain::storage::StorageResult;

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let deposits_table = Table::create()
        .if_not_exists()
        .table(deposits::Entity)
        .col(
            ColumnDef::new(deposits::Column::TransactionHash)
                .string_len(66)
                .not_null(),
        )
        .col(
            ColumnDef::new(deposits::Column::LogIndex)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(deposits::Column::BlockNumber)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(deposits::Column::BlockTimestamp)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(deposits::Column::Fee).string_len(80).not_null())
        .col(
            ColumnDef::new(deposits::Column::Pubkey)
                .string_len(98)
                .not_null(),
        )
        .col(ColumnDef::new(deposits::Column::Value).string_len(80).not_null())
        .col(
            ColumnDef::new(deposits::Column::CreatedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .primary_key(
            Index::create()
                .col(deposits::Column::TransactionHash)
                .col(deposits::Column::LogIndex),
        )
        .to_owned();
    create_table(db, backend, deposits_table).await?;

    let block_index = Index::create()
        .if_not_exists()
        .name("idx_deposits_block_number")
        .table(deposits::Entity)
        .col(deposits::Column::BlockNumber)
        .to_owned();
    create_index(db, backend, block_index).await?;

    let monitor_table = Table::create()
        .if_not_exists()
        .table(monitor_state::Entity)
        .col(
            ColumnDef::new(monitor_state::Column::Key)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(monitor_state::Column::ValueInt)
                .big_integer()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, monitor_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(crate::errors::StorageError::from_source)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    statement: IndexCreateStatement,
) -> StorageResult<()> {
    db.execute(backend.build(&statement))
        .await
        .map_err(crate::errors::StorageError::from_source)?;
    Ok(())
}
