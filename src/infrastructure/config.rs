use crate::infrastructure::error::InfraError;
use crate::infrastructure::identity_client::{DEFAULT_IDENTITY_TIMEOUT, IdentityConfig};
use crate::infrastructure::mailer::{DEFAULT_FROM_NAME, DEFAULT_SMTP_PORT, SmtpConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const IDENTITY_JSON: &str = "identity.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub app_name: String,
    pub lead_time_minutes: u32,
    pub send_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub sweep_concurrency: usize,
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "Quiet Scheduler".to_string(),
            lead_time_minutes: 10,
            send_timeout_seconds: 30,
            sweep_interval_seconds: 60,
            sweep_concurrency: 4,
            log_level: "info".to_string(),
        }
    }
}

impl AppSettings {
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.lead_time_minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "leadTimeMinutes must be > 0".to_string(),
            ));
        }
        if self.send_timeout_seconds == 0 {
            return Err(InfraError::InvalidConfig(
                "sendTimeoutSeconds must be > 0".to_string(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(InfraError::InvalidConfig(
                "sweepIntervalSeconds must be > 0".to_string(),
            ));
        }
        if self.sweep_concurrency == 0 {
            return Err(InfraError::InvalidConfig(
                "sweepConcurrency must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigBundle {
    pub app: AppSettings,
    pub identity_base_url: Option<String>,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    let defaults = AppSettings::default();
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": SUPPORTED_SCHEMA,
                "appName": defaults.app_name,
                "leadTimeMinutes": defaults.lead_time_minutes,
                "sendTimeoutSeconds": defaults.send_timeout_seconds,
                "sweepIntervalSeconds": defaults.sweep_interval_seconds,
                "sweepConcurrency": defaults.sweep_concurrency,
                "logLevel": defaults.log_level
            }),
        ),
        (
            IDENTITY_JSON,
            serde_json::json!({
                "schema": SUPPORTED_SCHEMA,
                "baseUrl": null
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_app_settings(config_dir)?,
        identity_base_url: read_identity_base_url(config_dir)?,
    })
}

/// Missing keys fall back to their defaults; present keys must be well-typed.
pub fn read_app_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    let path = config_dir.join(APP_JSON);
    let mut merged = serde_json::to_value(AppSettings::default())?;
    let parsed = read_config(&path)?;
    if let (Some(target), Some(source)) = (merged.as_object_mut(), parsed.as_object()) {
        for (key, value) in source {
            if key != "schema" && target.contains_key(key) {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    let settings = serde_json::from_value::<AppSettings>(merged).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid settings in {}: {error}", path.display()))
    })?;
    settings.validate()?;
    Ok(settings)
}

pub fn read_identity_base_url(config_dir: &Path) -> Result<Option<String>, InfraError> {
    let identity = read_config(&config_dir.join(IDENTITY_JSON))?;
    Ok(identity
        .get("baseUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned))
}

pub fn load_smtp_config_from_env() -> Result<SmtpConfig, InfraError> {
    load_smtp_config_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_smtp_config_from_lookup<F>(lookup: F) -> Result<SmtpConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = required_lookup_value(&lookup, &["QUIETBLOCK_SMTP_HOST", "SMTP_HOST"], "smtp host")?;
    let username =
        required_lookup_value(&lookup, &["QUIETBLOCK_SMTP_USER", "SMTP_USER"], "smtp user")?;
    let password = optional_lookup_value(&lookup, &["QUIETBLOCK_SMTP_PASS", "SMTP_PASS"]);
    let port = match optional_lookup_value(&lookup, &["QUIETBLOCK_SMTP_PORT", "SMTP_PORT"]) {
        Some(raw) => raw.parse::<u16>().map_err(|error| {
            InfraError::InvalidConfig(format!("smtp port must be a port number: {error}"))
        })?,
        None => DEFAULT_SMTP_PORT,
    };
    let from_address = optional_lookup_value(&lookup, &["QUIETBLOCK_SMTP_FROM", "SMTP_FROM"])
        .unwrap_or_else(|| username.clone());
    let from_name = optional_lookup_value(&lookup, &["QUIETBLOCK_SMTP_FROM_NAME"])
        .unwrap_or_else(|| DEFAULT_FROM_NAME.to_string());
    let use_tls = optional_lookup_value(&lookup, &["QUIETBLOCK_SMTP_TLS", "SMTP_TLS"])
        .map(|raw| !matches!(raw.to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"))
        .unwrap_or(true);

    Ok(SmtpConfig {
        host,
        port,
        username,
        password,
        from_address,
        from_name,
        use_tls,
    })
}

pub fn load_identity_config_from_env(
    base_url: Option<String>,
) -> Result<IdentityConfig, InfraError> {
    load_identity_config_from_lookup(base_url, |key| std::env::var(key).ok())
}

pub fn load_identity_config_from_lookup<F>(
    base_url: Option<String>,
    lookup: F,
) -> Result<IdentityConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let base_url = match base_url {
        Some(value) => value,
        None => required_lookup_value(
            &lookup,
            &["QUIETBLOCK_IDENTITY_URL", "IDENTITY_URL"],
            "identity base url",
        )?,
    };
    let timeout = match optional_lookup_value(&lookup, &["QUIETBLOCK_IDENTITY_TIMEOUT_SECONDS"]) {
        Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|error| {
            InfraError::InvalidConfig(format!("identity timeout must be whole seconds: {error}"))
        })?),
        None => DEFAULT_IDENTITY_TIMEOUT,
    };
    Ok(IdentityConfig {
        base_url,
        api_key: optional_lookup_value(
            &lookup,
            &["QUIETBLOCK_IDENTITY_API_KEY", "IDENTITY_API_KEY"],
        ),
        timeout,
    })
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
