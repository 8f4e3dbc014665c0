use chrono::Utc;
use deposit_tracker_domain::model::{DepositRecord, DepositStats, SaveOutcome};
use deposit_tracker_domain::services::connectivity::ConnectionState;
use deposit_tracker_domain::storage::{DepositStore, StorageResult};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{EntityTrait, PaginatorTrait, QueryOrder, QuerySelect, Set};
use tracing::warn;

use crate::entity::deposits;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl DepositStore for SeaOrmStorage {
    async fn save_deposit(&self, record: &DepositRecord) -> StorageResult<SaveOutcome> {
        self.ensure_connected()?;
        let key = record.key();
        let model = deposits::ActiveModel {
            transaction_hash: Set(key.transaction_hash),
            log_index: Set(key.log_index as i64),
            block_number: Set(record.block_number as i64),
            block_timestamp: Set(record.block_timestamp as i64),
            fee: Set(record.fee.clone()),
            pubkey: Set(record.pubkey.clone()),
            value: Set(record.value.clone()),
            created_at: Set(Utc::now()),
        };
        let affected = deposits::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    deposits::Column::TransactionHash,
                    deposits::Column::LogIndex,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(|err| self.map_db_error(err))?;

        Ok(if affected == 0 {
            SaveOutcome::DuplicateIgnored
        } else {
            SaveOutcome::Inserted
        })
    }

    async fn highest_persisted_height(&self) -> StorageResult<Option<u64>> {
        let max: Option<Option<i64>> = deposits::Entity::find()
            .select_only()
            .column_as(Expr::col(deposits::Column::BlockNumber).max(), "max_height")
            .into_tuple()
            .one(self.connection())
            .await
            .map_err(|err| self.map_db_error(err))?;
        Ok(max.flatten().map(|height| height as u64))
    }

    async fn deposit_stats(&self) -> StorageResult<DepositStats> {
        let count = deposits::Entity::find()
            .count(self.connection())
            .await
            .map_err(|err| self.map_db_error(err))?;
        let values: Vec<String> = deposits::Entity::find()
            .select_only()
            .column(deposits::Column::Value)
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|err| self.map_db_error(err))?;

        let mut total_value_wei: u128 = 0;
        for value in values {
            match value.parse::<u128>() {
                Ok(wei) => total_value_wei = total_value_wei.saturating_add(wei),
                Err(_) => warn!(value, "skipping non-decimal deposit value in aggregate"),
            }
        }

        Ok(DepositStats {
            count,
            total_value_wei,
        })
    }

    async fn recent_deposits(&self, limit: u64) -> StorageResult<Vec<DepositRecord>> {
        let rows = deposits::Entity::find()
            .order_by_desc(deposits::Column::BlockTimestamp)
            .order_by_desc(deposits::Column::LogIndex)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(|err| self.map_db_error(err))?;
        Ok(rows.into_iter().map(deposit_to_record).collect())
    }

    fn connection_state(&self) -> ConnectionState {
        self.connectivity().state()
    }
}

fn deposit_to_record(model: deposits::Model) -> DepositRecord {
    DepositRecord {
        block_number: model.block_number as u64,
        block_timestamp: model.block_timestamp as u64,
        fee: model.fee,
        transaction_hash: model.transaction_hash,
        log_index: model.log_index as u64,
        pubkey: model.pubkey,
        value: model.value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deposit_tracker_domain::storage::StorageError;

    async fn storage() -> SeaOrmStorage {
        SeaOrmStorage::connect("sqlite::memory:")
            .await
            .expect("storage inits")
    }

    fn record(hash: &str, log_index: u64, block_number: u64) -> DepositRecord {
        DepositRecord {
            block_number,
            block_timestamp: 1_700_000_000 + block_number,
            fee: "12000000000".into(),
            transaction_hash: hash.into(),
            log_index,
            pubkey: format!("0x{}", "ab".repeat(48)),
            value: "32000000000000000000".into(),
        }
    }

    #[tokio::test]
    async fn repeated_save_is_ignored() {
        let storage = storage().await;
        let deposit = record("0xaa", 3, 10);

        assert_eq!(
            storage.save_deposit(&deposit).await.unwrap(),
            SaveOutcome::Inserted
        );
        assert_eq!(
            storage.save_deposit(&deposit).await.unwrap(),
            SaveOutcome::DuplicateIgnored
        );
        assert_eq!(storage.deposit_stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn hash_case_does_not_bypass_dedup() {
        let storage = storage().await;
        storage.save_deposit(&record("0xAbCd", 0, 10)).await.unwrap();
        assert_eq!(
            storage.save_deposit(&record("0xabcd", 0, 10)).await.unwrap(),
            SaveOutcome::DuplicateIgnored
        );
    }

    #[tokio::test]
    async fn same_transaction_different_log_index_are_distinct() {
        let storage = storage().await;
        assert!(storage
            .save_deposit(&record("0xaa", 0, 10))
            .await
            .unwrap()
            .is_inserted());
        assert!(storage
            .save_deposit(&record("0xaa", 1, 10))
            .await
            .unwrap()
            .is_inserted());
        assert_eq!(storage.deposit_stats().await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn highest_height_tracks_max_block() {
        let storage = storage().await;
        assert_eq!(storage.highest_persisted_height().await.unwrap(), None);

        storage.save_deposit(&record("0x01", 0, 12)).await.unwrap();
        storage.save_deposit(&record("0x02", 0, 40)).await.unwrap();
        storage.save_deposit(&record("0x03", 0, 25)).await.unwrap();
        assert_eq!(storage.highest_persisted_height().await.unwrap(), Some(40));
    }

    #[tokio::test]
    async fn stats_sum_values_and_recent_orders_newest_first() {
        let storage = storage().await;
        storage.save_deposit(&record("0x01", 0, 12)).await.unwrap();
        storage.save_deposit(&record("0x02", 0, 40)).await.unwrap();

        let stats = storage.deposit_stats().await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_value_wei, 64_000_000_000_000_000_000);

        let recent = storage.recent_deposits(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].transaction_hash, "0x02");
        assert_eq!(recent[0].block_number, 40);
    }

    #[tokio::test]
    async fn saves_fail_fast_while_disconnected() {
        let storage = storage().await;
        storage.connectivity().mark_disconnected("test outage");
        assert_eq!(storage.connection_state(), ConnectionState::Disconnected);

        let err = storage
            .save_deposit(&record("0x01", 0, 12))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(matches!(err, StorageError::Unavailable(_)));

        storage.connectivity().mark_connected();
        assert!(storage
            .save_deposit(&record("0x01", 0, 12))
            .await
            .unwrap()
            .is_inserted());
    }
}
