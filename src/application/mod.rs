pub mod block_service;
pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod overlap;
pub mod reminder;
pub mod users;

#[cfg(test)]
pub(crate) mod test_support;

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}
