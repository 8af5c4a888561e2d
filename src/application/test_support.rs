use crate::domain::models::{NotificationPreferences, TimeBlock, User};
use crate::infrastructure::block_repository::{BlockRepository, InsertOutcome};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::identity_client::{CredentialCheck, IdentityProvider};
use crate::infrastructure::mailer::Mailer;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub fn fixed_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid datetime")
        .with_timezone(&Utc)
}

pub fn sample_user(id: &str, email: &str) -> User {
    let created_at = fixed_time("2026-02-01T00:00:00Z");
    User {
        id: id.to_string(),
        identity_id: format!("idp-{id}"),
        email: email.to_string(),
        display_name: None,
        time_zone: "UTC".to_string(),
        notification_preferences: NotificationPreferences::default(),
        created_at,
        updated_at: created_at,
    }
}

#[derive(Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.current.lock().expect("clock lock")
    }

    pub fn set(&self, value: DateTime<Utc>) {
        *self.current.lock().expect("clock lock") = value;
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().expect("clock lock");
        *current += by;
    }

    pub fn provider(&self) -> Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> {
        let clock = self.clone();
        Arc::new(move || clock.now())
    }
}

#[derive(Debug, Clone)]
pub enum FakeSend {
    Fail(String),
    Hang,
    Delay(std::time::Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Succeeds unless the next scripted step says otherwise.
#[derive(Default)]
pub struct FakeMailer {
    script: Mutex<VecDeque<FakeSend>>,
    sent: Mutex<Vec<SentMail>>,
}

impl FakeMailer {
    pub fn with_script(script: Vec<FakeSend>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().expect("sent lock").clone()
    }

    fn record(&self, to: &str, subject: &str, body: &str) {
        self.sent.lock().expect("sent lock").push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), InfraError> {
        let step = self.script.lock().expect("script lock").pop_front();
        match step {
            Some(FakeSend::Fail(message)) => Err(InfraError::Mail(message)),
            Some(FakeSend::Hang) => std::future::pending().await,
            Some(FakeSend::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                self.record(to, subject, body);
                Ok(())
            }
            None => {
                self.record(to, subject, body);
                Ok(())
            }
        }
    }
}

pub struct FailingBlockRepository;

impl FailingBlockRepository {
    fn outage() -> InfraError {
        InfraError::InvalidConfig("database is unreachable".to_string())
    }
}

impl BlockRepository for FailingBlockRepository {
    fn find_overlapping(
        &self,
        _owner_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        Err(Self::outage())
    }

    fn insert_if_free(&self, _block: &TimeBlock) -> Result<InsertOutcome, InfraError> {
        Err(Self::outage())
    }

    fn get_by_id(&self, _block_id: &str) -> Result<Option<TimeBlock>, InfraError> {
        Err(Self::outage())
    }

    fn list_for_owner(&self, _owner_id: &str) -> Result<Vec<TimeBlock>, InfraError> {
        Err(Self::outage())
    }

    fn list_due(
        &self,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        Err(Self::outage())
    }

    fn mark_notified(&self, _block_id: &str) -> Result<bool, InfraError> {
        Err(Self::outage())
    }
}

/// Maps known credentials to identity ids; `"outage"` simulates an unreachable provider.
#[derive(Default)]
pub struct FakeIdentityProvider {
    credentials: HashMap<String, String>,
}

impl FakeIdentityProvider {
    pub fn with_credential(mut self, credential: &str, identity_id: &str) -> Self {
        self.credentials
            .insert(credential.to_string(), identity_id.to_string());
        self
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn verify_credential(&self, credential: &str) -> Result<CredentialCheck, InfraError> {
        if credential == "outage" {
            return Err(InfraError::Identity("connection refused".to_string()));
        }
        Ok(match self.credentials.get(credential) {
            Some(identity_id) => CredentialCheck::Valid {
                identity_id: identity_id.clone(),
            },
            None => CredentialCheck::Invalid,
        })
    }
}
