use crate::application::error::ServiceError;
use crate::application::next_id;
use crate::domain::models::{DEFAULT_TIME_ZONE, NotificationPreferences, User, parse_time_zone};
use crate::infrastructure::identity_client::{CredentialCheck, IdentityProvider};
use crate::infrastructure::user_repository::{UserInsertOutcome, UserRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub identity_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub time_zone: Option<String>,
    pub email_notifications: Option<bool>,
}

pub struct UserService<U>
where
    U: UserRepository,
{
    users: Arc<U>,
    now_provider: NowProvider,
}

impl<U> UserService<U>
where
    U: UserRepository,
{
    pub fn new(users: Arc<U>) -> Self {
        Self {
            users,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Registering an identity that already has a user returns that user unchanged.
    pub fn register_user(&self, request: NewUser) -> Result<User, ServiceError> {
        let identity_id = request.identity_id.trim();
        if identity_id.is_empty() {
            return Err(ServiceError::MissingField("identityId"));
        }
        let email = request.email.trim().to_lowercase();
        let email = email.as_str();
        if email.is_empty() {
            return Err(ServiceError::MissingField("email"));
        }
        if !looks_like_email(email) {
            return Err(ServiceError::InvalidField(format!(
                "email '{email}' is not an address"
            )));
        }
        let time_zone = match request
            .time_zone
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(name) => parse_time_zone(name)
                .map(|zone| zone.name().to_string())
                .ok_or_else(|| ServiceError::InvalidTimeZone(name.to_string()))?,
            None => DEFAULT_TIME_ZONE.to_string(),
        };

        if let Some(existing) = self.users.find_by_identity_id(identity_id)? {
            debug!(user_id = %existing.id, "identity already registered");
            return Ok(existing);
        }

        let now = (self.now_provider)();
        let user = User {
            id: next_id("usr"),
            identity_id: identity_id.to_string(),
            email: email.to_string(),
            display_name: request
                .display_name
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            time_zone,
            notification_preferences: NotificationPreferences {
                email: request.email_notifications.unwrap_or(true),
            },
            created_at: now,
            updated_at: now,
        };

        match self.users.insert(&user)? {
            UserInsertOutcome::Inserted => {
                info!(user_id = %user.id, "registered user");
                Ok(user)
            }
            UserInsertOutcome::IdentityTaken => self
                .users
                .find_by_identity_id(identity_id)?
                .ok_or_else(|| ServiceError::Conflict(format!("identity {identity_id}"))),
            UserInsertOutcome::EmailTaken => {
                warn!(%email, "email already registered to another identity");
                Err(ServiceError::Conflict(format!(
                    "email {email} is already registered"
                )))
            }
        }
    }

    pub fn get_user(&self, user_id: &str) -> Result<User, ServiceError> {
        self.users
            .get_by_id(user_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))
    }

    pub fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        Ok(self.users.list_all()?)
    }

    /// Maps a bearer credential to the registered user it belongs to.
    pub async fn resolve_user<I>(
        &self,
        identity: &I,
        credential: &str,
    ) -> Result<User, ServiceError>
    where
        I: IdentityProvider + ?Sized,
    {
        let check = identity
            .verify_credential(credential)
            .await
            .map_err(|error| ServiceError::IdentityUnavailable(error.to_string()))?;
        let identity_id = match check {
            CredentialCheck::Valid { identity_id } => identity_id,
            CredentialCheck::Invalid => {
                return Err(ServiceError::Unauthorized(
                    "credential was rejected by the identity provider".to_string(),
                ));
            }
        };
        self.users.find_by_identity_id(&identity_id)?.ok_or_else(|| {
            ServiceError::NotFound(format!("no user registered for identity {identity_id}"))
        })
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{FakeIdentityProvider, fixed_time};
    use crate::infrastructure::user_repository::InMemoryUserRepository;

    fn service() -> UserService<InMemoryUserRepository> {
        let now = fixed_time("2026-02-16T09:00:00Z");
        UserService::new(Arc::new(InMemoryUserRepository::default()))
            .with_now_provider(Arc::new(move || now))
    }

    fn request(identity_id: &str, email: &str) -> NewUser {
        NewUser {
            identity_id: identity_id.to_string(),
            email: email.to_string(),
            ..NewUser::default()
        }
    }

    #[test]
    fn register_applies_defaults() {
        let user = service()
            .register_user(request("idp-1", " ada@example.com "))
            .expect("register");
        assert!(user.id.starts_with("usr-"));
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.time_zone, "UTC");
        assert!(user.notification_preferences.email);
        assert_eq!(user.created_at, fixed_time("2026-02-16T09:00:00Z"));
    }

    #[test]
    fn register_is_idempotent_per_identity() {
        let service = service();
        let first = service
            .register_user(request("idp-1", "ada@example.com"))
            .expect("first");
        let second = service
            .register_user(request("idp-1", "other@example.com"))
            .expect("second");
        assert_eq!(first, second);
        assert_eq!(service.list_users().expect("list").len(), 1);
    }

    #[test]
    fn register_rejects_taken_email_and_bad_input() {
        let service = service();
        service
            .register_user(request("idp-1", "ada@example.com"))
            .expect("first");
        assert!(matches!(
            service.register_user(request("idp-2", "ada@example.com")),
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            service.register_user(request(" ", "x@example.com")),
            Err(ServiceError::MissingField("identityId"))
        ));
        assert!(matches!(
            service.register_user(request("idp-3", "not-an-address")),
            Err(ServiceError::InvalidField(_))
        ));

        let mut zoned = request("idp-4", "tz@example.com");
        zoned.time_zone = Some("Mars/Olympus".to_string());
        assert!(matches!(
            service.register_user(zoned),
            Err(ServiceError::InvalidTimeZone(_))
        ));
    }

    #[test]
    fn email_addresses_are_unique_regardless_of_case() {
        let service = service();
        let ada = service
            .register_user(request("idp-1", "Ada@Example.com"))
            .expect("register");
        assert_eq!(ada.email, "ada@example.com");
        assert!(matches!(
            service.register_user(request("idp-2", "ada@example.com")),
            Err(ServiceError::Conflict(_))
        ));
    }

    #[test]
    fn register_keeps_valid_zone_and_preference() {
        let mut zoned = request("idp-1", "ada@example.com");
        zoned.time_zone = Some("Asia/Tokyo".to_string());
        zoned.email_notifications = Some(false);
        zoned.display_name = Some("  Ada ".to_string());
        let user = service().register_user(zoned).expect("register");
        assert_eq!(user.time_zone, "Asia/Tokyo");
        assert_eq!(user.display_name.as_deref(), Some("Ada"));
        assert!(!user.wants_email());
    }

    #[test]
    fn get_user_reports_missing() {
        assert!(matches!(
            service().get_user("usr-missing"),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn resolve_user_maps_credentials() {
        let service = service();
        let ada = service
            .register_user(request("idp-ada", "ada@example.com"))
            .expect("register");
        let identity = FakeIdentityProvider::default()
            .with_credential("token-ada", "idp-ada")
            .with_credential("token-stranger", "idp-stranger");

        assert_eq!(
            service
                .resolve_user(&identity, "token-ada")
                .await
                .expect("resolve"),
            ada
        );
        assert!(matches!(
            service.resolve_user(&identity, "forged").await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            service.resolve_user(&identity, "token-stranger").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.resolve_user(&identity, "outage").await,
            Err(ServiceError::IdentityUnavailable(_))
        ));
    }
}
