use crate::application::error::ServiceError;
use crate::domain::models::{TimeBlock, User};
use crate::infrastructure::block_repository::BlockRepository;
use crate::infrastructure::config::AppSettings;
use crate::infrastructure::mailer::Mailer;
use crate::infrastructure::notification_repository::{DispatchClaim, NotificationRepository};
use crate::infrastructure::user_repository::UserRepository;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderConfig {
    pub lead_time: Duration,
    pub send_timeout: StdDuration,
    pub concurrency: usize,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            lead_time: Duration::minutes(10),
            send_timeout: StdDuration::from_secs(30),
            concurrency: 4,
        }
    }
}

impl ReminderConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            lead_time: Duration::minutes(i64::from(settings.lead_time_minutes)),
            send_timeout: StdDuration::from_secs(settings.send_timeout_seconds),
            concurrency: settings.sweep_concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SweepResult {
    pub selected: usize,
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SweepResult {
    fn absorb(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => {
                self.attempted += 1;
                self.sent += 1;
            }
            DispatchOutcome::Failed(_) => {
                self.attempted += 1;
                self.failed += 1;
            }
            DispatchOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OwnerMissing,
    NoEmailAddress,
    EmailDisabled,
    AlreadyNotified,
    InFlight,
    NotDue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed(String),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderMessage {
    pub subject: String,
    pub body: String,
}

impl ReminderMessage {
    pub fn compose(block: &TimeBlock, owner: &User, lead_time: Duration) -> Self {
        let local_start = block
            .start_at
            .with_timezone(&owner.zone())
            .format("%Y-%m-%d %H:%M %Z");
        let greeting_name = owner.display_name.as_deref().unwrap_or_default();
        Self {
            subject: format!(
                "Your block \"{}\" starts in {} minutes",
                block.title,
                lead_time.num_minutes()
            ),
            body: format!(
                "Hi {greeting_name},\n\nYour block \"{}\" starts at {local_start}.\n\nStay focused!",
                block.title
            ),
        }
    }
}

/// Arms a best-effort reminder for a freshly created block.
pub trait ReminderTrigger: Send + Sync {
    fn arm(&self, block: &TimeBlock);
}

pub struct ReminderScheduler<B, U, N, M>
where
    B: BlockRepository,
    U: UserRepository,
    N: NotificationRepository,
    M: Mailer,
{
    blocks: Arc<B>,
    users: Arc<U>,
    notifications: Arc<N>,
    mailer: Arc<M>,
    config: ReminderConfig,
    now_provider: NowProvider,
}

impl<B, U, N, M> Clone for ReminderScheduler<B, U, N, M>
where
    B: BlockRepository,
    U: UserRepository,
    N: NotificationRepository,
    M: Mailer,
{
    fn clone(&self) -> Self {
        Self {
            blocks: Arc::clone(&self.blocks),
            users: Arc::clone(&self.users),
            notifications: Arc::clone(&self.notifications),
            mailer: Arc::clone(&self.mailer),
            config: self.config.clone(),
            now_provider: Arc::clone(&self.now_provider),
        }
    }
}

impl<B, U, N, M> ReminderScheduler<B, U, N, M>
where
    B: BlockRepository + 'static,
    U: UserRepository + 'static,
    N: NotificationRepository + 'static,
    M: Mailer + 'static,
{
    pub fn new(
        blocks: Arc<B>,
        users: Arc<U>,
        notifications: Arc<N>,
        mailer: Arc<M>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            blocks,
            users,
            notifications,
            mailer,
            config,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.config
    }

    pub async fn run_sweep(&self) -> Result<SweepResult, ServiceError> {
        self.run_sweep_at((self.now_provider)()).await
    }

    /// Sends one reminder per unnotified block starting within `[now, now + lead_time]`.
    ///
    /// Per-block failures are counted, never raised. Only failing to query the
    /// store for due blocks aborts the sweep.
    pub async fn run_sweep_at(&self, now: DateTime<Utc>) -> Result<SweepResult, ServiceError> {
        let window_end = now + self.config.lead_time;
        let due = self.blocks.list_due(now, window_end).map_err(|error| {
            error!(%error, "sweep aborted: could not query due blocks");
            ServiceError::from(error)
        })?;

        let mut result = SweepResult {
            selected: due.len(),
            ..SweepResult::default()
        };
        let concurrency = self.config.concurrency.max(1);
        let mut dispatches: JoinSet<(String, DispatchOutcome)> = JoinSet::new();

        for block in due {
            let scheduler = self.clone();
            dispatches.spawn(async move {
                let block_id = block.id.clone();
                (block_id, scheduler.dispatch(block).await)
            });

            if dispatches.len() >= concurrency {
                collect_dispatch(&mut dispatches, &mut result).await;
            }
        }

        while !dispatches.is_empty() {
            collect_dispatch(&mut dispatches, &mut result).await;
        }

        info!(
            selected = result.selected,
            attempted = result.attempted,
            sent = result.sent,
            failed = result.failed,
            skipped = result.skipped,
            "reminder sweep finished"
        );
        Ok(result)
    }

    /// Single-block path used by armed reminders; applies the same due check as a sweep.
    pub async fn remind_block(&self, block_id: &str) -> Result<DispatchOutcome, ServiceError> {
        let block = self
            .blocks
            .get_by_id(block_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("block {block_id}")))?;
        if block.notified {
            return Ok(DispatchOutcome::Skipped(SkipReason::AlreadyNotified));
        }
        let now = (self.now_provider)();
        if !block.is_due(now, now + self.config.lead_time) {
            return Ok(DispatchOutcome::Skipped(SkipReason::NotDue));
        }
        Ok(self.dispatch(block).await)
    }

    async fn dispatch(&self, block: TimeBlock) -> DispatchOutcome {
        let owner = match self.users.get_by_id(&block.owner_id) {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                info!(
                    block_id = %block.id,
                    owner_id = %block.owner_id,
                    "skipping reminder: owner not found"
                );
                return DispatchOutcome::Skipped(SkipReason::OwnerMissing);
            }
            Err(error) => {
                error!(block_id = %block.id, %error, "could not load block owner");
                return DispatchOutcome::Failed(error.to_string());
            }
        };
        if owner.email.trim().is_empty() {
            info!(
                block_id = %block.id,
                owner_id = %owner.id,
                "skipping reminder: owner has no email address"
            );
            return DispatchOutcome::Skipped(SkipReason::NoEmailAddress);
        }
        if !owner.wants_email() {
            info!(
                block_id = %block.id,
                owner_id = %owner.id,
                "skipping reminder: email notifications disabled"
            );
            return DispatchOutcome::Skipped(SkipReason::EmailDisabled);
        }

        let scheduled_for = block.start_at - self.config.lead_time;
        let claimed = match self.notifications.claim(
            &owner.id,
            &block.id,
            scheduled_for,
            (self.now_provider)(),
            self.claim_lease(),
        ) {
            Ok(DispatchClaim::Claimed(_)) => true,
            // A previous send succeeded but its flag update did not land.
            Ok(DispatchClaim::AlreadySent) => {
                self.flag_notified(&block);
                return DispatchOutcome::Skipped(SkipReason::AlreadyNotified);
            }
            Ok(DispatchClaim::InFlight) => {
                debug!(block_id = %block.id, "reminder is being sent by another sweep");
                return DispatchOutcome::Skipped(SkipReason::InFlight);
            }
            Err(error) => {
                warn!(
                    block_id = %block.id,
                    %error,
                    "notification record unavailable; sending without a claim"
                );
                false
            }
        };

        let message = ReminderMessage::compose(&block, &owner, self.config.lead_time);
        match self.send_with_timeout(&owner.email, &message).await {
            Ok(()) => {
                self.flag_notified(&block);
                if claimed {
                    if let Err(error) = self.notifications.record_sent(
                        &owner.id,
                        &block.id,
                        (self.now_provider)(),
                    ) {
                        warn!(block_id = %block.id, %error, "failed to record sent notification");
                    }
                }
                info!(block_id = %block.id, to = %owner.email, "reminder sent");
                DispatchOutcome::Sent
            }
            Err(ServiceError::DeliveryFailure(reason)) => {
                if claimed {
                    if let Err(error) =
                        self.notifications
                            .record_failure(&owner.id, &block.id, &reason)
                    {
                        warn!(block_id = %block.id, %error, "failed to record failed notification");
                    }
                }
                warn!(
                    block_id = %block.id,
                    %reason,
                    "reminder delivery failed; eligible for retry"
                );
                DispatchOutcome::Failed(reason)
            }
            Err(other) => DispatchOutcome::Failed(other.to_string()),
        }
    }

    /// A claim outlives the send it guards by at most the send timeout.
    fn claim_lease(&self) -> Duration {
        Duration::from_std(self.config.send_timeout).unwrap_or_else(|_| Duration::days(1))
    }

    fn flag_notified(&self, block: &TimeBlock) {
        match self.blocks.mark_notified(&block.id) {
            Ok(true) => {}
            Ok(false) => debug!(block_id = %block.id, "block already flagged as notified"),
            Err(error) => error!(
                block_id = %block.id,
                %error,
                "reminder sent but notified flag not stored; a later sweep may resend"
            ),
        }
    }

    async fn send_with_timeout(
        &self,
        to: &str,
        message: &ReminderMessage,
    ) -> Result<(), ServiceError> {
        match tokio::time::timeout(
            self.config.send_timeout,
            self.mailer.send(to, &message.subject, &message.body),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ServiceError::DeliveryFailure(error.to_string())),
            Err(_) => Err(ServiceError::DeliveryFailure(format!(
                "send timed out after {}ms",
                self.config.send_timeout.as_millis()
            ))),
        }
    }
}

impl<B, U, N, M> ReminderTrigger for ReminderScheduler<B, U, N, M>
where
    B: BlockRepository + 'static,
    U: UserRepository + 'static,
    N: NotificationRepository + 'static,
    M: Mailer + 'static,
{
    /// Fires at `start - lead_time`, or right away when that moment has passed but the
    /// block has not started. Requires a running tokio runtime; otherwise the sweep
    /// delivers.
    fn arm(&self, block: &TimeBlock) {
        let now = (self.now_provider)();
        if block.start_at < now {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(block_id = %block.id, "no async runtime; early reminder left to the sweep");
            return;
        };

        let fire_at = block.start_at - self.config.lead_time;
        let delay = (fire_at - now).to_std().unwrap_or(StdDuration::ZERO);
        let scheduler = self.clone();
        let block_id = block.id.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            match scheduler.remind_block(&block_id).await {
                Ok(outcome) => debug!(%block_id, ?outcome, "early reminder fired"),
                Err(error) => warn!(%block_id, %error, "early reminder failed"),
            }
        });
    }
}

async fn collect_dispatch(
    dispatches: &mut JoinSet<(String, DispatchOutcome)>,
    result: &mut SweepResult,
) {
    let Some(joined) = dispatches.join_next().await else {
        return;
    };
    match joined {
        Ok((block_id, outcome)) => {
            debug!(%block_id, ?outcome, "reminder dispatch finished");
            result.absorb(&outcome);
        }
        Err(error) => {
            error!(%error, "reminder dispatch task did not complete");
            result.absorb(&DispatchOutcome::Failed(error.to_string()));
        }
    }
}
