use crate::domain::models::TimeBlock;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{from_micros, open_connection, to_micros};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Overlapping,
}

pub trait BlockRepository: Send + Sync {
    /// Blocks of `owner_id` with `start < end_arg AND end > start_arg`.
    fn find_overlapping(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError>;

    /// Inserts only if no overlapping block of the same owner exists, decided in the
    /// same atomic step as the write.
    fn insert_if_free(&self, block: &TimeBlock) -> Result<InsertOutcome, InfraError>;

    fn get_by_id(&self, block_id: &str) -> Result<Option<TimeBlock>, InfraError>;

    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<TimeBlock>, InfraError>;

    /// Unnotified blocks with `start` in `[window_start, window_end]`, ordered by start.
    fn list_due(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError>;

    /// Flips `notified` from false to true. Returns false when the block was already
    /// notified or does not exist.
    fn mark_notified(&self, block_id: &str) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteBlockRepository {
    db_path: PathBuf,
}

type BlockRow = (String, String, String, Option<String>, i64, i64, bool, i64);

const BLOCK_COLUMNS: &str =
    "id, owner_id, title, description, start_at, end_at, notified, created_at";

impl SqliteBlockRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    fn into_block(row: BlockRow) -> Result<TimeBlock, InfraError> {
        let (id, owner_id, title, description, start_at, end_at, notified, created_at) = row;
        Ok(TimeBlock {
            id,
            owner_id,
            title,
            description,
            start_at: from_micros(start_at, "time_blocks.start_at")?,
            end_at: from_micros(end_at, "time_blocks.end_at")?,
            notified,
            created_at: from_micros(created_at, "time_blocks.created_at")?,
        })
    }

    fn query_blocks(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(sql)?;
        let rows = statement
            .query_map(params, Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::into_block).collect()
    }
}

impl BlockRepository for SqliteBlockRepository {
    fn find_overlapping(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        self.query_blocks(
            &format!(
                "SELECT {BLOCK_COLUMNS} FROM time_blocks
                 WHERE owner_id = ?1 AND start_at < ?2 AND end_at > ?3
                 ORDER BY start_at"
            ),
            params![owner_id, to_micros(end), to_micros(start)],
        )
    }

    fn insert_if_free(&self, block: &TimeBlock) -> Result<InsertOutcome, InfraError> {
        block.validate().map_err(InfraError::InvalidRecord)?;
        let mut connection = self.connect()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = transaction.execute(
            "INSERT INTO time_blocks
               (id, owner_id, title, description, start_at, end_at, notified, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, 0, ?7
             WHERE NOT EXISTS (
               SELECT 1 FROM time_blocks
               WHERE owner_id = ?2 AND start_at < ?6 AND end_at > ?5
             )",
            params![
                block.id,
                block.owner_id,
                block.title,
                block.description,
                to_micros(block.start_at),
                to_micros(block.end_at),
                to_micros(block.created_at),
            ],
        )?;
        transaction.commit()?;

        Ok(if inserted == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Overlapping
        })
    }

    fn get_by_id(&self, block_id: &str) -> Result<Option<TimeBlock>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM time_blocks WHERE id = ?1"),
                params![block_id],
                Self::read_row,
            )
            .optional()?;
        row.map(Self::into_block).transpose()
    }

    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<TimeBlock>, InfraError> {
        self.query_blocks(
            &format!(
                "SELECT {BLOCK_COLUMNS} FROM time_blocks WHERE owner_id = ?1 ORDER BY start_at"
            ),
            params![owner_id],
        )
    }

    fn list_due(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        self.query_blocks(
            &format!(
                "SELECT {BLOCK_COLUMNS} FROM time_blocks
                 WHERE notified = 0 AND start_at BETWEEN ?1 AND ?2
                 ORDER BY start_at"
            ),
            params![to_micros(window_start), to_micros(window_end)],
        )
    }

    fn mark_notified(&self, block_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE time_blocks SET notified = 1 WHERE id = ?1 AND notified = 0",
            params![block_id],
        )?;
        Ok(updated == 1)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBlockRepository {
    blocks: Mutex<HashMap<String, TimeBlock>>,
}

impl InMemoryBlockRepository {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, TimeBlock>>, InfraError> {
        self.blocks.lock().map_err(|error| {
            InfraError::LockPoisoned(format!("block store lock poisoned: {error}"))
        })
    }

    fn sorted(mut blocks: Vec<TimeBlock>) -> Vec<TimeBlock> {
        blocks.sort_by(|left, right| {
            left.start_at
                .cmp(&right.start_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        blocks
    }
}

impl BlockRepository for InMemoryBlockRepository {
    fn find_overlapping(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let blocks = self.lock()?;
        Ok(Self::sorted(
            blocks
                .values()
                .filter(|block| block.owner_id == owner_id && block.overlaps(start, end))
                .cloned()
                .collect(),
        ))
    }

    fn insert_if_free(&self, block: &TimeBlock) -> Result<InsertOutcome, InfraError> {
        block.validate().map_err(InfraError::InvalidRecord)?;
        let mut blocks = self.lock()?;
        let collides = blocks.values().any(|existing| {
            existing.owner_id == block.owner_id && existing.overlaps(block.start_at, block.end_at)
        });
        if collides {
            return Ok(InsertOutcome::Overlapping);
        }
        let mut stored = block.clone();
        stored.notified = false;
        blocks.insert(stored.id.clone(), stored);
        Ok(InsertOutcome::Inserted)
    }

    fn get_by_id(&self, block_id: &str) -> Result<Option<TimeBlock>, InfraError> {
        Ok(self.lock()?.get(block_id).cloned())
    }

    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<TimeBlock>, InfraError> {
        let blocks = self.lock()?;
        Ok(Self::sorted(
            blocks
                .values()
                .filter(|block| block.owner_id == owner_id)
                .cloned()
                .collect(),
        ))
    }

    fn list_due(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let blocks = self.lock()?;
        Ok(Self::sorted(
            blocks
                .values()
                .filter(|block| block.is_due(window_start, window_end))
                .cloned()
                .collect(),
        ))
    }

    fn mark_notified(&self, block_id: &str) -> Result<bool, InfraError> {
        let mut blocks = self.lock()?;
        match blocks.get_mut(block_id) {
            Some(block) if !block.notified => {
                block.notified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
