use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

const USER_ENDPOINT_PATH: &str = "auth/v1/user";
const API_KEY_HEADER: &str = "apikey";
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCheck {
    Valid { identity_id: String },
    Invalid,
}

/// Resolves an opaque credential to the provider's stable user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_credential(&self, credential: &str) -> Result<CredentialCheck, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestIdentityProvider {
    client: Client,
    user_endpoint: Url,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, serde::Deserialize)]
struct IdentityUserPayload {
    id: Option<String>,
}

impl ReqwestIdentityProvider {
    pub fn new(config: &IdentityConfig) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| {
                InfraError::Identity(format!("failed to build http client: {error}"))
            })?;
        Ok(Self {
            client,
            user_endpoint: user_endpoint(&config.base_url)?,
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl IdentityProvider for ReqwestIdentityProvider {
    async fn verify_credential(&self, credential: &str) -> Result<CredentialCheck, InfraError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Ok(CredentialCheck::Invalid);
        }

        let mut request = self
            .client
            .get(self.user_endpoint.clone())
            .bearer_auth(credential);
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                InfraError::Identity(format!(
                    "request timed out after {}ms",
                    self.timeout.as_millis()
                ))
            } else {
                InfraError::Identity(format!("request failed: {error}"))
            }
        })?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(CredentialCheck::Invalid);
        }

        let body = response
            .text()
            .await
            .map_err(|error| {
                InfraError::Identity(format!("failed reading user response: {error}"))
            })?;
        if !status.is_success() {
            return Err(InfraError::Identity(format!(
                "user endpoint error: http {}; body={body}",
                status.as_u16()
            )));
        }

        parse_user_payload(&body)
    }
}

fn user_endpoint(base_url: &str) -> Result<Url, InfraError> {
    let base_url = base_url.trim();
    if base_url.is_empty() {
        return Err(InfraError::InvalidConfig(
            "identity baseUrl must not be empty".to_string(),
        ));
    }
    let mut base = Url::parse(base_url)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid identity baseUrl: {error}")))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(USER_ENDPOINT_PATH)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid identity endpoint: {error}")))
}

fn parse_user_payload(body: &str) -> Result<CredentialCheck, InfraError> {
    let payload = serde_json::from_str::<IdentityUserPayload>(body).map_err(|error| {
        InfraError::Identity(format!("invalid user payload: {error}; body={body}"))
    })?;
    Ok(match payload
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(identity_id) => CredentialCheck::Valid {
            identity_id: identity_id.to_string(),
        },
        None => CredentialCheck::Invalid,
    })
}
