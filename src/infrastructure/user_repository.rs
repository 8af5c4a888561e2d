use crate::domain::models::{NotificationPreferences, User};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{from_micros, open_connection, to_micros};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInsertOutcome {
    Inserted,
    IdentityTaken,
    EmailTaken,
}

pub trait UserRepository: Send + Sync {
    fn insert(&self, user: &User) -> Result<UserInsertOutcome, InfraError>;
    fn get_by_id(&self, user_id: &str) -> Result<Option<User>, InfraError>;
    fn find_by_identity_id(&self, identity_id: &str) -> Result<Option<User>, InfraError>;
    fn list_all(&self) -> Result<Vec<User>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteUserRepository {
    db_path: PathBuf,
}

type UserRow = (String, String, String, Option<String>, String, bool, i64, i64);

const USER_COLUMNS: &str =
    "id, identity_id, email, display_name, time_zone, notify_email, created_at, updated_at";

impl SqliteUserRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
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

    fn into_user(row: UserRow) -> Result<User, InfraError> {
        let (
            id,
            identity_id,
            email,
            display_name,
            time_zone,
            notify_email,
            created_at,
            updated_at,
        ) = row;
        Ok(User {
            id,
            identity_id,
            email,
            display_name,
            time_zone,
            notification_preferences: NotificationPreferences {
                email: notify_email,
            },
            created_at: from_micros(created_at, "users.created_at")?,
            updated_at: from_micros(updated_at, "users.updated_at")?,
        })
    }

    fn find_one(&self, column: &str, value: &str) -> Result<Option<User>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"),
                params![value],
                Self::read_row,
            )
            .optional()?;
        row.map(Self::into_user).transpose()
    }
}

impl UserRepository for SqliteUserRepository {
    fn insert(&self, user: &User) -> Result<UserInsertOutcome, InfraError> {
        user.validate().map_err(InfraError::InvalidRecord)?;
        let connection = self.connect()?;
        let result = connection.execute(
            &format!(
                "INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                user.id,
                user.identity_id,
                user.email,
                user.display_name,
                user.time_zone,
                user.notification_preferences.email,
                to_micros(user.created_at),
                to_micros(user.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(UserInsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(error, Some(message)))
                if error.code == ErrorCode::ConstraintViolation =>
            {
                if message.contains("users.email") {
                    Ok(UserInsertOutcome::EmailTaken)
                } else if message.contains("users.identity_id") {
                    Ok(UserInsertOutcome::IdentityTaken)
                } else {
                    Err(InfraError::Sqlite(rusqlite::Error::SqliteFailure(
                        error,
                        Some(message),
                    )))
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    fn get_by_id(&self, user_id: &str) -> Result<Option<User>, InfraError> {
        self.find_one("id", user_id)
    }

    fn find_by_identity_id(&self, identity_id: &str) -> Result<Option<User>, InfraError> {
        self.find_one("identity_id", identity_id)
    }

    fn list_all(&self) -> Result<Vec<User>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id"
        ))?;
        let rows = statement
            .query_map([], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::into_user).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: Mutex<Vec<User>>,
}

impl InMemoryUserRepository {
    fn lock(&self) -> Result<MutexGuard<'_, Vec<User>>, InfraError> {
        self.users
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("user store lock poisoned: {error}")))
    }
}

impl UserRepository for InMemoryUserRepository {
    fn insert(&self, user: &User) -> Result<UserInsertOutcome, InfraError> {
        user.validate().map_err(InfraError::InvalidRecord)?;
        let mut users = self.lock()?;
        if users.iter().any(|existing| existing.identity_id == user.identity_id) {
            return Ok(UserInsertOutcome::IdentityTaken);
        }
        if users
            .iter()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
        {
            return Ok(UserInsertOutcome::EmailTaken);
        }
        users.push(user.clone());
        Ok(UserInsertOutcome::Inserted)
    }

    fn get_by_id(&self, user_id: &str) -> Result<Option<User>, InfraError> {
        Ok(self.lock()?.iter().find(|user| user.id == user_id).cloned())
    }

    fn find_by_identity_id(&self, identity_id: &str) -> Result<Option<User>, InfraError> {
        Ok(self
            .lock()?
            .iter()
            .find(|user| user.identity_id == identity_id)
            .cloned())
    }

    fn list_all(&self) -> Result<Vec<User>, InfraError> {
        let mut users = self.lock()?.clone();
        users.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(users)
    }
}
