use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIME_ZONE: &str = "UTC";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPreferences {
    pub email: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self { email: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub identity_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub time_zone: String,
    pub notification_preferences: NotificationPreferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "user.id")?;
        validate_non_empty(&self.identity_id, "user.identity_id")?;
        validate_non_empty(&self.email, "user.email")?;
        if parse_time_zone(&self.time_zone).is_none() {
            return Err(format!("user.time_zone '{}' is not an IANA name", self.time_zone));
        }
        Ok(())
    }

    /// Zone used to render reminder times. Unknown names fall back to UTC.
    pub fn zone(&self) -> Tz {
        parse_time_zone(&self.time_zone).unwrap_or(Tz::UTC)
    }

    pub fn wants_email(&self) -> bool {
        self.notification_preferences.email && !self.email.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBlock {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl TimeBlock {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "block.id")?;
        validate_non_empty(&self.owner_id, "block.owner_id")?;
        validate_non_empty(&self.title, "block.title")?;
        if self.end_at <= self.start_at {
            return Err("block.end_at must be after block.start_at".to_string());
        }
        Ok(())
    }

    /// Half-open `[start, end)` intersection with a candidate interval.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        intervals_overlap(self.start_at, self.end_at, start, end)
    }

    /// Reminder eligibility: not yet notified and starting within `[now, window_end]`.
    pub fn is_due(&self, now: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
        !self.notified && self.start_at >= now && self.start_at <= window_end
    }
}

pub fn intervals_overlap(
    left_start: DateTime<Utc>,
    left_end: DateTime<Utc>,
    right_start: DateTime<Utc>,
    right_end: DateTime<Utc>,
) -> bool {
    left_start < right_end && left_end > right_start
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Delivery lineage for one block; at most one per `(owner_id, block_id)`.
///
/// `claimed_at` is set while a sender holds the record in `Sending`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRecord {
    pub owner_id: String,
    pub block_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: NotificationStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub error_message: Option<String>,
}

impl NotificationRecord {
    pub fn pending(owner_id: &str, block_id: &str, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            block_id: block_id.to_string(),
            scheduled_for,
            sent_at: None,
            status: NotificationStatus::Pending,
            claimed_at: None,
            attempts: 0,
            error_message: None,
        }
    }
}

pub fn parse_time_zone(value: &str) -> Option<Tz> {
    value.trim().parse::<Tz>().ok()
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
