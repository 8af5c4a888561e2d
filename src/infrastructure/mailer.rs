use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub const DEFAULT_FROM_NAME: &str = "Quiet Scheduler";
pub const DEFAULT_SMTP_PORT: u16 = 587;
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub from_address: String,
    pub from_name: String,
    pub use_tls: bool,
}

/// Accept/reject at submission time only; no delivery confirmation.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), InfraError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, InfraError> {
        let host = config.host.trim();
        if host.is_empty() {
            return Err(InfraError::InvalidConfig("smtp host must not be empty".to_string()));
        }

        let mut builder = if config.use_tls {
            let tls_parameters = TlsParameters::new(host.to_string())
                .map_err(|error| InfraError::InvalidConfig(format!("smtp tls error: {error}")))?;
            if config.port == IMPLICIT_TLS_PORT {
                AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                    .map_err(relay_error)?
                    .port(config.port)
                    .tls(Tls::Wrapper(tls_parameters))
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .map_err(relay_error)?
                    .port(config.port)
                    .tls(Tls::Required(tls_parameters))
            }
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(config.port)
        };

        if let Some(password) = config.password.clone() {
            builder = builder.credentials(Credentials::new(config.username.clone(), password));
        }

        Ok(Self {
            transport: builder.build(),
            from: parse_from_mailbox(&config.from_name, &config.from_address)?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), InfraError> {
        let to = to
            .trim()
            .parse::<Mailbox>()
            .map_err(|error| InfraError::Mail(format!("invalid recipient '{to}': {error}")))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|error| InfraError::Mail(format!("failed to build message: {error}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|error| InfraError::Mail(format!("smtp send failed: {error}")))?;
        Ok(())
    }
}

fn relay_error(error: lettre::transport::smtp::Error) -> InfraError {
    InfraError::InvalidConfig(format!("smtp relay error: {error}"))
}

fn parse_from_mailbox(name: &str, address: &str) -> Result<Mailbox, InfraError> {
    let address = address
        .trim()
        .parse()
        .map_err(|error| {
            InfraError::InvalidConfig(format!("invalid from address '{address}': {error}"))
        })?;
    let name = name.trim();
    Ok(Mailbox::new(
        (!name.is_empty()).then(|| name.to_string()),
        address,
    ))
}
