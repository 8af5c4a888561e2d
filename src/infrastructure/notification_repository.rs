use crate::domain::models::{NotificationRecord, NotificationStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{from_micros, open_connection, to_micros};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchClaim {
    /// The caller owns the send until it records an outcome or the lease lapses.
    Claimed(NotificationRecord),
    AlreadySent,
    InFlight,
}

impl DispatchClaim {
    fn from_record(claimed: bool, record: NotificationRecord) -> Self {
        if claimed {
            Self::Claimed(record)
        } else if record.status == NotificationStatus::Sent {
            Self::AlreadySent
        } else {
            Self::InFlight
        }
    }
}

pub trait NotificationRepository: Send + Sync {
    /// Creates the pending record for `(owner_id, block_id)` when absent, then moves it to
    /// `sending` for exactly one caller. A `sending` claim older than `lease` counts as
    /// abandoned and can be taken over.
    fn claim(
        &self,
        owner_id: &str,
        block_id: &str,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<DispatchClaim, InfraError>;

    fn record_sent(
        &self,
        owner_id: &str,
        block_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    fn record_failure(
        &self,
        owner_id: &str,
        block_id: &str,
        error_message: &str,
    ) -> Result<(), InfraError>;

    fn get(
        &self,
        owner_id: &str,
        block_id: &str,
    ) -> Result<Option<NotificationRecord>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteNotificationRepository {
    db_path: PathBuf,
}

type NotificationRow = (
    String,
    String,
    i64,
    Option<i64>,
    String,
    Option<i64>,
    u32,
    Option<String>,
);

impl SqliteNotificationRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }

    fn load(
        connection: &Connection,
        owner_id: &str,
        block_id: &str,
    ) -> Result<Option<NotificationRecord>, InfraError> {
        let row: Option<NotificationRow> = connection
            .query_row(
                "SELECT owner_id, block_id, scheduled_for, sent_at, status, claimed_at, attempts,
                        error_message
                 FROM notifications WHERE owner_id = ?1 AND block_id = ?2",
                params![owner_id, block_id],
                |row| {
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
                },
            )
            .optional()?;

        let Some((
            owner_id,
            block_id,
            scheduled_for,
            sent_at,
            status_raw,
            claimed_at,
            attempts,
            error_message,
        )) = row
        else {
            return Ok(None);
        };

        let status = NotificationStatus::parse(&status_raw).ok_or_else(|| {
            InfraError::CorruptRecord(format!("invalid notifications.status '{status_raw}'"))
        })?;

        Ok(Some(NotificationRecord {
            owner_id,
            block_id,
            scheduled_for: from_micros(scheduled_for, "notifications.scheduled_for")?,
            sent_at: sent_at
                .map(|value| from_micros(value, "notifications.sent_at"))
                .transpose()?,
            status,
            claimed_at: claimed_at
                .map(|value| from_micros(value, "notifications.claimed_at"))
                .transpose()?,
            attempts,
            error_message,
        }))
    }

    fn require_updated(updated: usize, owner_id: &str, block_id: &str) -> Result<(), InfraError> {
        if updated == 0 {
            return Err(InfraError::CorruptRecord(format!(
                "no notification record for owner_id={owner_id} block_id={block_id}"
            )));
        }
        Ok(())
    }
}

impl NotificationRepository for SqliteNotificationRepository {
    fn claim(
        &self,
        owner_id: &str,
        block_id: &str,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<DispatchClaim, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        transaction.execute(
            "INSERT INTO notifications (owner_id, block_id, scheduled_for, status, attempts)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(owner_id, block_id) DO NOTHING",
            params![
                owner_id,
                block_id,
                to_micros(scheduled_for),
                NotificationStatus::Pending.as_str()
            ],
        )?;
        let claimed = transaction.execute(
            "UPDATE notifications
             SET status = ?3, claimed_at = ?4
             WHERE owner_id = ?1 AND block_id = ?2
               AND (status IN ('pending', 'failed')
                    OR (status = 'sending' AND COALESCE(claimed_at, 0) < ?5))",
            params![
                owner_id,
                block_id,
                NotificationStatus::Sending.as_str(),
                to_micros(now),
                to_micros(now - lease)
            ],
        )?;
        let record = Self::load(&transaction, owner_id, block_id)?.ok_or_else(|| {
            InfraError::CorruptRecord(format!(
                "notification record vanished for owner_id={owner_id} block_id={block_id}"
            ))
        })?;
        transaction.commit()?;
        Ok(DispatchClaim::from_record(claimed > 0, record))
    }

    fn record_sent(
        &self,
        owner_id: &str,
        block_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE notifications
             SET status = ?4, sent_at = ?3, claimed_at = NULL, attempts = attempts + 1,
                 error_message = NULL
             WHERE owner_id = ?1 AND block_id = ?2",
            params![
                owner_id,
                block_id,
                to_micros(sent_at),
                NotificationStatus::Sent.as_str()
            ],
        )?;
        Self::require_updated(updated, owner_id, block_id)
    }

    fn record_failure(
        &self,
        owner_id: &str,
        block_id: &str,
        error_message: &str,
    ) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE notifications
             SET status = CASE WHEN status = 'sent' THEN status ELSE 'failed' END,
                 claimed_at = NULL,
                 attempts = attempts + 1,
                 error_message = ?3
             WHERE owner_id = ?1 AND block_id = ?2",
            params![owner_id, block_id, error_message],
        )?;
        Self::require_updated(updated, owner_id, block_id)
    }

    fn get(
        &self,
        owner_id: &str,
        block_id: &str,
    ) -> Result<Option<NotificationRecord>, InfraError> {
        let connection = self.connect()?;
        Self::load(&connection, owner_id, block_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationRepository {
    records: Mutex<HashMap<(String, String), NotificationRecord>>,
}

impl InMemoryNotificationRepository {
    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<(String, String), NotificationRecord>>, InfraError> {
        self.records.lock().map_err(|error| {
            InfraError::LockPoisoned(format!("notification store lock poisoned: {error}"))
        })
    }

    fn key(owner_id: &str, block_id: &str) -> (String, String) {
        (owner_id.to_string(), block_id.to_string())
    }
}

impl NotificationRepository for InMemoryNotificationRepository {
    fn claim(
        &self,
        owner_id: &str,
        block_id: &str,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<DispatchClaim, InfraError> {
        let mut records = self.lock()?;
        let record = records
            .entry(Self::key(owner_id, block_id))
            .or_insert_with(|| NotificationRecord::pending(owner_id, block_id, scheduled_for));
        let claimable = match record.status {
            NotificationStatus::Pending | NotificationStatus::Failed => true,
            NotificationStatus::Sending => record
                .claimed_at
                .is_none_or(|claimed_at| claimed_at < now - lease),
            NotificationStatus::Sent => false,
        };
        if claimable {
            record.status = NotificationStatus::Sending;
            record.claimed_at = Some(now);
        }
        Ok(DispatchClaim::from_record(claimable, record.clone()))
    }

    fn record_sent(
        &self,
        owner_id: &str,
        block_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut records = self.lock()?;
        let record = records.get_mut(&Self::key(owner_id, block_id)).ok_or_else(|| {
            InfraError::CorruptRecord(format!(
                "no notification record for owner_id={owner_id} block_id={block_id}"
            ))
        })?;
        record.status = NotificationStatus::Sent;
        record.sent_at = Some(sent_at);
        record.claimed_at = None;
        record.attempts = record.attempts.saturating_add(1);
        record.error_message = None;
        Ok(())
    }

    fn record_failure(
        &self,
        owner_id: &str,
        block_id: &str,
        error_message: &str,
    ) -> Result<(), InfraError> {
        let mut records = self.lock()?;
        let record = records.get_mut(&Self::key(owner_id, block_id)).ok_or_else(|| {
            InfraError::CorruptRecord(format!(
                "no notification record for owner_id={owner_id} block_id={block_id}"
            ))
        })?;
        if record.status != NotificationStatus::Sent {
            record.status = NotificationStatus::Failed;
        }
        record.claimed_at = None;
        record.attempts = record.attempts.saturating_add(1);
        record.error_message = Some(error_message.to_string());
        Ok(())
    }

    fn get(
        &self,
        owner_id: &str,
        block_id: &str,
    ) -> Result<Option<NotificationRecord>, InfraError> {
        Ok(self.lock()?.get(&Self::key(owner_id, block_id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{NotificationPreferences, TimeBlock, User};
    use crate::infrastructure::block_repository::{BlockRepository, SqliteBlockRepository};
    use crate::infrastructure::storage::initialize_database;
    use crate::infrastructure::user_repository::{SqliteUserRepository, UserRepository};
    use chrono::Duration;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn seeded_sqlite() -> (PathBuf, SqliteNotificationRepository) {
        let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "quietblock-notification-repo-tests-{}-{}",
            std::process::id(),
            sequence
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("quietblock.sqlite");
        initialize_database(&path).expect("initialize database");

        let created_at = fixed_time("2026-02-16T08:00:00Z");
        SqliteUserRepository::new(&path)
            .insert(&User {
                id: "usr-1".to_string(),
                identity_id: "idp-1".to_string(),
                email: "ada@example.com".to_string(),
                display_name: None,
                time_zone: "UTC".to_string(),
                notification_preferences: NotificationPreferences::default(),
                created_at,
                updated_at: created_at,
            })
            .expect("seed user");
        SqliteBlockRepository::new(&path)
            .insert_if_free(&TimeBlock {
                id: "blk-1".to_string(),
                owner_id: "usr-1".to_string(),
                title: "Deep work".to_string(),
                description: None,
                start_at: fixed_time("2026-02-16T10:00:00Z"),
                end_at: fixed_time("2026-02-16T11:00:00Z"),
                notified: false,
                created_at,
            })
            .expect("seed block");

        (dir, SqliteNotificationRepository::new(&path))
    }

    fn exercise_lineage<R: NotificationRepository>(repository: &R) {
        let scheduled_for = fixed_time("2026-02-16T09:50:00Z");
        let now = fixed_time("2026-02-16T09:51:00Z");
        let lease = Duration::seconds(30);

        let DispatchClaim::Claimed(first) = repository
            .claim("usr-1", "blk-1", scheduled_for, now, lease)
            .expect("first claim")
        else {
            panic!("first claim should win");
        };
        assert_eq!(first.status, NotificationStatus::Sending);
        assert_eq!(first.claimed_at, Some(now));
        assert_eq!(first.attempts, 0);

        repository
            .record_failure("usr-1", "blk-1", "smtp timeout")
            .expect("record failure");
        let DispatchClaim::Claimed(again) = repository
            .claim("usr-1", "blk-1", scheduled_for + Duration::minutes(1), now, lease)
            .expect("reclaim after failure")
        else {
            panic!("failed record should be claimable");
        };
        assert_eq!(again.attempts, 1);
        assert_eq!(again.scheduled_for, scheduled_for);
        assert_eq!(again.error_message.as_deref(), Some("smtp timeout"));

        let sent_at = fixed_time("2026-02-16T09:52:00Z");
        repository
            .record_sent("usr-1", "blk-1", sent_at)
            .expect("record sent");
        let stored = repository
            .get("usr-1", "blk-1")
            .expect("get")
            .expect("record exists");
        assert_eq!(stored.status, NotificationStatus::Sent);
        assert_eq!(stored.sent_at, Some(sent_at));
        assert_eq!(stored.claimed_at, None);
        assert_eq!(stored.attempts, 2);
        assert!(stored.error_message.is_none());
        assert_eq!(
            repository
                .claim("usr-1", "blk-1", scheduled_for, sent_at, lease)
                .expect("claim sent record"),
            DispatchClaim::AlreadySent
        );

        assert!(repository.record_sent("usr-1", "missing", sent_at).is_err());
    }

    fn exercise_claim_lease<R: NotificationRepository>(repository: &R) {
        let scheduled_for = fixed_time("2026-02-16T09:50:00Z");
        let now = fixed_time("2026-02-16T09:51:00Z");
        let lease = Duration::seconds(30);

        assert!(matches!(
            repository.claim("usr-1", "blk-1", scheduled_for, now, lease),
            Ok(DispatchClaim::Claimed(_))
        ));
        assert_eq!(
            repository
                .claim("usr-1", "blk-1", scheduled_for, now + Duration::seconds(30), lease)
                .expect("claim within lease"),
            DispatchClaim::InFlight
        );

        let DispatchClaim::Claimed(taken_over) = repository
            .claim("usr-1", "blk-1", scheduled_for, now + Duration::seconds(31), lease)
            .expect("claim after lease")
        else {
            panic!("stale claim should be taken over");
        };
        assert_eq!(taken_over.claimed_at, Some(now + Duration::seconds(31)));
    }

    #[test]
    fn in_memory_keeps_one_lineage_per_block() {
        exercise_lineage(&InMemoryNotificationRepository::default());
    }

    #[test]
    fn sqlite_keeps_one_lineage_per_block() {
        let (dir, repository) = seeded_sqlite();
        exercise_lineage(&repository);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn in_memory_claim_is_exclusive_until_lease_lapses() {
        exercise_claim_lease(&InMemoryNotificationRepository::default());
    }

    #[test]
    fn sqlite_claim_is_exclusive_until_lease_lapses() {
        let (dir, repository) = seeded_sqlite();
        exercise_claim_lease(&repository);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn sqlite_claim_has_one_winner_across_threads() {
        let (dir, repository) = seeded_sqlite();
        let repository = std::sync::Arc::new(repository);
        let now = fixed_time("2026-02-16T09:51:00Z");

        let handles = (0..6)
            .map(|_| {
                let repository = std::sync::Arc::clone(&repository);
                std::thread::spawn(move || {
                    repository.claim(
                        "usr-1",
                        "blk-1",
                        fixed_time("2026-02-16T09:50:00Z"),
                        now,
                        Duration::seconds(30),
                    )
                })
            })
            .collect::<Vec<_>>();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("join").expect("claim"))
            .filter(|claim| matches!(claim, DispatchClaim::Claimed(_)))
            .count();

        assert_eq!(winners, 1);
        let _ = fs::remove_dir_all(dir);
    }
}
