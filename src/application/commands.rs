use crate::application::block_service::{BlockService, NewBlock};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::error::ServiceError;
use crate::application::reminder::{ReminderConfig, ReminderScheduler, SweepResult};
use crate::application::users::{NewUser, UserService};
use crate::domain::models::{NotificationRecord, TimeBlock, User};
use crate::domain::phase::{ListedBlock, PhaseFilter};
use crate::infrastructure::block_repository::SqliteBlockRepository;
use crate::infrastructure::config::{
    AppSettings, load_identity_config_from_env, load_smtp_config_from_env,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::identity_client::{IdentityProvider, ReqwestIdentityProvider};
use crate::infrastructure::mailer::{Mailer, SmtpMailer};
use crate::infrastructure::notification_repository::{
    NotificationRepository, SqliteNotificationRepository,
};
use crate::infrastructure::user_repository::SqliteUserRepository;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub struct AppState {
    workspace_root: PathBuf,
    logs_dir: PathBuf,
    database_path: PathBuf,
    settings: AppSettings,
    identity_base_url: Option<String>,
    blocks: Arc<SqliteBlockRepository>,
    users: Arc<SqliteUserRepository>,
    notifications: Arc<SqliteNotificationRepository>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let database_path = bootstrap.database_path;

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            logs_dir: bootstrap.logs_dir,
            settings: bootstrap.configs.app,
            identity_base_url: bootstrap.configs.identity_base_url,
            blocks: Arc::new(SqliteBlockRepository::new(&database_path)),
            users: Arc::new(SqliteUserRepository::new(&database_path)),
            notifications: Arc::new(SqliteNotificationRepository::new(&database_path)),
            database_path,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn command_error(&self, command: &str, error: &CommandError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }

    fn user_service(&self) -> UserService<SqliteUserRepository> {
        UserService::new(Arc::clone(&self.users))
    }

    fn block_service(&self) -> BlockService<SqliteBlockRepository, SqliteUserRepository> {
        BlockService::new(Arc::clone(&self.blocks), Arc::clone(&self.users))
    }

    fn scheduler<M>(
        &self,
        mailer: Arc<M>,
    ) -> ReminderScheduler<
        SqliteBlockRepository,
        SqliteUserRepository,
        SqliteNotificationRepository,
        M,
    >
    where
        M: Mailer + 'static,
    {
        ReminderScheduler::new(
            Arc::clone(&self.blocks),
            Arc::clone(&self.users),
            Arc::clone(&self.notifications),
            mailer,
            ReminderConfig::from_settings(&self.settings),
        )
    }

    fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.send_timeout_seconds)
    }
}

pub fn register_user_impl(state: &AppState, request: NewUser) -> Result<User, CommandError> {
    Ok(state.user_service().register_user(request)?)
}

pub fn list_users_impl(state: &AppState) -> Result<Vec<User>, CommandError> {
    Ok(state.user_service().list_users()?)
}

/// Resolves the acting user from a provider credential when one is given, otherwise
/// from an explicit user id.
pub async fn resolve_owner_impl(
    state: &AppState,
    user_id: Option<String>,
    credential: Option<String>,
) -> Result<String, CommandError> {
    match credential {
        Some(credential) => {
            let config = load_identity_config_from_env(state.identity_base_url.clone())?;
            let provider = ReqwestIdentityProvider::new(&config)?;
            resolve_owner_with(state, &provider, &credential).await
        }
        None => owner_by_id(state, user_id),
    }
}

pub async fn resolve_owner_with<I>(
    state: &AppState,
    identity: &I,
    credential: &str,
) -> Result<String, CommandError>
where
    I: IdentityProvider + ?Sized,
{
    Ok(state
        .user_service()
        .resolve_user(identity, credential)
        .await?
        .id)
}

fn owner_by_id(state: &AppState, user_id: Option<String>) -> Result<String, CommandError> {
    let user_id = user_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ServiceError::MissingField("userId"))?;
    Ok(state.user_service().get_user(&user_id)?.id)
}

pub fn create_block_impl(
    state: &AppState,
    owner_id: String,
    title: String,
    description: Option<String>,
    start_at: String,
    end_at: String,
) -> Result<TimeBlock, CommandError> {
    let request = NewBlock {
        owner_id,
        title,
        description,
        start_at: parse_rfc3339_input(&start_at, "start")?,
        end_at: parse_rfc3339_input(&end_at, "end")?,
    };
    Ok(state.block_service().create_block(request)?)
}

pub fn list_blocks_impl(
    state: &AppState,
    owner_id: String,
    filter: Option<String>,
) -> Result<Vec<ListedBlock>, CommandError> {
    let filter = PhaseFilter::parse(filter.as_deref());
    Ok(state.block_service().list_blocks(&owner_id, filter)?)
}

pub fn notification_for_impl(
    state: &AppState,
    owner_id: String,
    block_id: String,
) -> Result<Option<NotificationRecord>, CommandError> {
    Ok(state.notifications.get(&owner_id, &block_id)?)
}

pub async fn run_sweep_impl(state: &AppState) -> Result<SweepResult, CommandError> {
    let mailer = Arc::new(smtp_mailer_from_env()?);
    run_sweep_with(state, mailer).await
}

pub async fn run_sweep_with<M>(
    state: &AppState,
    mailer: Arc<M>,
) -> Result<SweepResult, CommandError>
where
    M: Mailer + 'static,
{
    let started = Instant::now();
    let result = state.scheduler(mailer).run_sweep().await?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "sweep command finished");
    Ok(result)
}

/// Sweeps every `sweepIntervalSeconds` until Ctrl-C. A failed sweep is logged and the
/// loop keeps going.
pub async fn serve_impl(state: &AppState) -> Result<(), CommandError> {
    let mailer = Arc::new(smtp_mailer_from_env()?);
    serve_until(state, mailer, async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await
}

pub async fn serve_until<M, F>(
    state: &AppState,
    mailer: Arc<M>,
    shutdown: F,
) -> Result<(), CommandError>
where
    M: Mailer + 'static,
    F: std::future::Future<Output = ()>,
{
    let scheduler = state.scheduler(mailer);
    let period = Duration::from_secs(state.settings.sweep_interval_seconds);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(
        interval_seconds = state.settings.sweep_interval_seconds,
        lead_time_minutes = state.settings.lead_time_minutes,
        "reminder service started"
    );
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("reminder service stopping");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(error) = scheduler.run_sweep().await {
                    error!(%error, "sweep failed; retrying next interval");
                }
            }
        }
    }
}

pub async fn send_email_impl(
    state: &AppState,
    to: String,
    subject: String,
    body: String,
) -> Result<(), CommandError> {
    let mailer = smtp_mailer_from_env()?;
    send_email_with(state, &mailer, to, subject, body).await
}

pub async fn send_email_with<M>(
    state: &AppState,
    mailer: &M,
    to: String,
    subject: String,
    body: String,
) -> Result<(), CommandError>
where
    M: Mailer + ?Sized,
{
    if to.trim().is_empty() {
        return Err(ServiceError::MissingField("to").into());
    }
    if subject.trim().is_empty() {
        return Err(ServiceError::MissingField("subject").into());
    }
    let timeout = state.send_timeout();
    match tokio::time::timeout(timeout, mailer.send(to.trim(), &subject, &body)).await {
        Ok(Ok(())) => {
            info!(to = %to.trim(), "email sent");
            Ok(())
        }
        Ok(Err(error)) => Err(ServiceError::DeliveryFailure(error.to_string()).into()),
        Err(_) => Err(ServiceError::DeliveryFailure(format!(
            "send timed out after {}ms",
            timeout.as_millis()
        ))
        .into()),
    }
}

fn smtp_mailer_from_env() -> Result<SmtpMailer, InfraError> {
    SmtpMailer::new(&load_smtp_config_from_env()?)
}

fn parse_rfc3339_input(value: &str, field_name: &str) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            ServiceError::InvalidField(format!("{field_name} must be RFC3339 date-time: {error}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{FakeIdentityProvider, FakeMailer, FakeSend};
    use crate::domain::models::NotificationStatus;
    use crate::domain::phase::BlockPhase;
    use chrono::Duration as ChronoDuration;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "quietblock-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state(&self) -> AppState {
            AppState::new(self.path.clone()).expect("initialize app state")
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn register(state: &AppState, identity_id: &str, email: &str) -> User {
        register_user_impl(
            state,
            NewUser {
                identity_id: identity_id.to_string(),
                email: email.to_string(),
                ..NewUser::default()
            },
        )
        .expect("register user")
    }

    #[test]
    fn create_block_rejects_malformed_timestamps() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let user = register(&state, "idp-1", "ada@example.com");

        let result = create_block_impl(
            &state,
            user.id,
            "Deep work".to_string(),
            None,
            "tomorrow morning".to_string(),
            "2026-02-16T11:00:00Z".to_string(),
        );
        assert!(matches!(
            result,
            Err(CommandError::Service(ServiceError::InvalidField(_)))
        ));
    }

    #[test]
    fn create_and_list_blocks_roundtrip() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let user = register(&state, "idp-1", "ada@example.com");

        let start = Utc::now() + ChronoDuration::hours(2);
        let created = create_block_impl(
            &state,
            user.id.clone(),
            "Write chapter".to_string(),
            Some("outline first".to_string()),
            start.to_rfc3339(),
            (start + ChronoDuration::hours(1)).to_rfc3339(),
        )
        .expect("create block");

        let overlapping = create_block_impl(
            &state,
            user.id.clone(),
            "Clash".to_string(),
            None,
            (start + ChronoDuration::minutes(30)).to_rfc3339(),
            (start + ChronoDuration::hours(2)).to_rfc3339(),
        );
        assert!(matches!(
            overlapping,
            Err(CommandError::Service(ServiceError::Overlap))
        ));

        let listed = list_blocks_impl(&state, user.id.clone(), Some("upcoming".to_string()))
            .expect("list blocks");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].block.id, created.id);
        assert_eq!(listed[0].phase, BlockPhase::Upcoming);

        let unknown_filter = list_blocks_impl(&state, user.id, Some("someday".to_string()))
            .expect("list blocks");
        assert_eq!(unknown_filter.len(), 1);
    }

    #[tokio::test]
    async fn sweep_command_sends_and_records_lineage() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let user = register(&state, "idp-1", "ada@example.com");
        let start = Utc::now() + ChronoDuration::minutes(5);
        let block = create_block_impl(
            &state,
            user.id.clone(),
            "Standup prep".to_string(),
            None,
            start.to_rfc3339(),
            (start + ChronoDuration::minutes(30)).to_rfc3339(),
        )
        .expect("create block");

        let mailer = Arc::new(FakeMailer::default());
        let first = run_sweep_with(&state, Arc::clone(&mailer))
            .await
            .expect("first sweep");
        assert_eq!((first.attempted, first.sent, first.failed), (1, 1, 0));
        let second = run_sweep_with(&state, Arc::clone(&mailer))
            .await
            .expect("second sweep");
        assert_eq!(second.attempted, 0);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.com");
        assert_eq!(
            sent[0].subject,
            "Your block \"Standup prep\" starts in 10 minutes"
        );

        let record = notification_for_impl(&state, user.id, block.id)
            .expect("load record")
            .expect("record exists");
        assert_eq!(record.status, NotificationStatus::Sent);
        assert_eq!(record.attempts, 1);
        assert!(record.sent_at.is_some());
    }

    #[tokio::test]
    async fn send_email_maps_mailer_errors_to_delivery_failure() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let mailer = FakeMailer::with_script(vec![FakeSend::Fail("relay denied".to_string())]);

        let failed = send_email_with(
            &state,
            &mailer,
            "ada@example.com".to_string(),
            "Hello".to_string(),
            "Body".to_string(),
        )
        .await;
        match failed {
            Err(CommandError::Service(ServiceError::DeliveryFailure(message))) => {
                assert!(message.contains("relay denied"));
            }
            other => panic!("expected delivery failure, got {other:?}"),
        }

        send_email_with(
            &state,
            &mailer,
            "ada@example.com".to_string(),
            "Hello".to_string(),
            "Body".to_string(),
        )
        .await
        .expect("second send succeeds");
        assert_eq!(mailer.sent().len(), 1);

        assert!(matches!(
            send_email_with(
                &state,
                &mailer,
                " ".to_string(),
                "Hi".to_string(),
                String::new()
            )
            .await,
            Err(CommandError::Service(ServiceError::MissingField("to")))
        ));
    }

    #[tokio::test]
    async fn resolve_owner_by_id_or_credential() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let user = register(&state, "idp-ada", "ada@example.com");
        let identity = FakeIdentityProvider::default().with_credential("token-ada", "idp-ada");

        let by_credential = resolve_owner_with(&state, &identity, "token-ada")
            .await
            .expect("resolve by credential");
        assert_eq!(by_credential, user.id);

        let by_id = resolve_owner_impl(&state, Some(user.id.clone()), None)
            .await
            .expect("resolve by id");
        assert_eq!(by_id, user.id);

        assert!(matches!(
            resolve_owner_impl(&state, None, None).await,
            Err(CommandError::Service(ServiceError::MissingField("userId")))
        ));
        assert!(matches!(
            resolve_owner_with(&state, &identity, "forged").await,
            Err(CommandError::Service(ServiceError::Unauthorized(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn serve_sweeps_until_shutdown() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let user = register(&state, "idp-1", "ada@example.com");
        let start = Utc::now() + ChronoDuration::minutes(5);
        let block = create_block_impl(
            &state,
            user.id.clone(),
            "Review".to_string(),
            None,
            start.to_rfc3339(),
            (start + ChronoDuration::minutes(30)).to_rfc3339(),
        )
        .expect("create block");
        let mailer = Arc::new(FakeMailer::default());

        serve_until(
            &state,
            Arc::clone(&mailer),
            tokio::time::sleep(Duration::from_secs(
                state.settings().sweep_interval_seconds * 3,
            )),
        )
        .await
        .expect("serve returns on shutdown");

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Your block \"Review\" starts in 10 minutes");
        let record = notification_for_impl(&state, user.id, block.id)
            .expect("load record")
            .expect("record exists");
        assert_eq!(record.status, NotificationStatus::Sent);
    }
}
