use crate::application::error::ServiceError;
use crate::application::next_id;
use crate::application::overlap::OverlapChecker;
use crate::application::reminder::ReminderTrigger;
use crate::domain::models::TimeBlock;
use crate::domain::phase::{ListedBlock, PhaseFilter, list_by_phase};
use crate::infrastructure::block_repository::{BlockRepository, InsertOutcome};
use crate::infrastructure::user_repository::UserRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

pub struct BlockService<B, U>
where
    B: BlockRepository,
    U: UserRepository,
{
    blocks: Arc<B>,
    users: Arc<U>,
    overlap: OverlapChecker<B>,
    reminder_trigger: Option<Arc<dyn ReminderTrigger>>,
    now_provider: NowProvider,
}

impl<B, U> BlockService<B, U>
where
    B: BlockRepository,
    U: UserRepository,
{
    pub fn new(blocks: Arc<B>, users: Arc<U>) -> Self {
        Self {
            overlap: OverlapChecker::new(Arc::clone(&blocks)),
            blocks,
            users,
            reminder_trigger: None,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_reminder_trigger(mut self, trigger: Arc<dyn ReminderTrigger>) -> Self {
        self.reminder_trigger = Some(trigger);
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn create_block(&self, request: NewBlock) -> Result<TimeBlock, ServiceError> {
        let owner_id = request.owner_id.trim();
        if owner_id.is_empty() {
            return Err(ServiceError::MissingField("ownerId"));
        }
        let title = request.title.trim();
        if title.is_empty() {
            return Err(ServiceError::MissingField("title"));
        }
        if request.start_at >= request.end_at {
            return Err(ServiceError::InvalidInterval);
        }
        if self.users.get_by_id(owner_id)?.is_none() {
            return Err(ServiceError::NotFound(format!("user {owner_id}")));
        }

        self.overlap
            .admit(owner_id, request.start_at, request.end_at)?;

        let block = TimeBlock {
            id: next_id("blk"),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            description: request
                .description
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            start_at: request.start_at,
            end_at: request.end_at,
            notified: false,
            created_at: (self.now_provider)(),
        };

        match self.blocks.insert_if_free(&block)? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Overlapping => {
                warn!(owner_id, "overlapping block committed concurrently; insert rejected");
                return Err(ServiceError::Overlap);
            }
        }
        info!(block_id = %block.id, owner_id, start_at = %block.start_at, "created block");

        if let Some(trigger) = &self.reminder_trigger {
            trigger.arm(&block);
        }
        Ok(block)
    }

    pub fn list_blocks(
        &self,
        owner_id: &str,
        filter: PhaseFilter,
    ) -> Result<Vec<ListedBlock>, ServiceError> {
        self.list_blocks_at((self.now_provider)(), owner_id, filter)
    }

    pub fn list_blocks_at(
        &self,
        now: DateTime<Utc>,
        owner_id: &str,
        filter: PhaseFilter,
    ) -> Result<Vec<ListedBlock>, ServiceError> {
        if self.users.get_by_id(owner_id)?.is_none() {
            return Err(ServiceError::NotFound(format!("user {owner_id}")));
        }
        let blocks = self.blocks.list_for_owner(owner_id)?;
        Ok(list_by_phase(now, blocks, filter))
    }
}
