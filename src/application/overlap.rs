use crate::application::error::ServiceError;
use crate::infrastructure::block_repository::BlockRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Read-only admission check for a candidate interval. The authoritative check is
/// repeated by `BlockRepository::insert_if_free` at write time.
pub struct OverlapChecker<B>
where
    B: BlockRepository,
{
    blocks: Arc<B>,
}

impl<B> OverlapChecker<B>
where
    B: BlockRepository,
{
    pub fn new(blocks: Arc<B>) -> Self {
        Self { blocks }
    }

    pub fn admit(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if start >= end {
            return Err(ServiceError::InvalidInterval);
        }
        let colliding = self.blocks.find_overlapping(owner_id, start, end)?;
        if let Some(existing) = colliding.first() {
            tracing::debug!(
                owner_id,
                existing_block_id = %existing.id,
                "rejected overlapping interval"
            );
            return Err(ServiceError::Overlap);
        }
        Ok(())
    }
}
