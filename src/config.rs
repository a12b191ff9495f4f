//! Runtime settings
//!
//! Defaults come from [`crate::constants`]; each value can be overridden
//! through an `ADROSTER_*` environment variable. The CLI layers its own flags
//! on top of the result.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    APP_DIR_NAME, DEFAULT_TEMP_PASSWORD_PREFIX, LDAPS_PORT, LDAP_CONNECT_TIMEOUT_SECS, LDAP_PORT,
    REACHABILITY_TIMEOUT_MS, ROSTER_PAGE_SIZE,
};
use crate::core::{AggregatePolicy, PermissionCheckOptions, SyncOptions};
use crate::utils::ConfigError;

pub const ENV_DATA_DIR: &str = "ADROSTER_DATA_DIR";
pub const ENV_LDAPS: &str = "ADROSTER_LDAPS";
pub const ENV_LDAP_PORT: &str = "ADROSTER_LDAP_PORT";
pub const ENV_CONNECT_TIMEOUT: &str = "ADROSTER_CONNECT_TIMEOUT_SECS";
pub const ENV_PAGE_SIZE: &str = "ADROSTER_PAGE_SIZE";
pub const ENV_SAMPLE_SIZE: &str = "ADROSTER_SAMPLE_SIZE";
pub const ENV_AGGREGATE_POLICY: &str = "ADROSTER_AGGREGATE_POLICY";
pub const ENV_TASK_TIMEOUT: &str = "ADROSTER_TASK_TIMEOUT_SECS";
pub const ENV_TEMP_PASSWORD_PREFIX: &str = "ADROSTER_TEMP_PASSWORD_PREFIX";
pub const ENV_LOG_VERBOSE: &str = "ADROSTER_LOG_VERBOSE";

/// Connection settings for the LDAP provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapSettings {
    pub use_ldaps: bool,
    pub port: u16,
    pub connect_timeout: Duration,
    pub page_size: i32,
    pub reachability_timeout: Duration,
}

impl Default for LdapSettings {
    fn default() -> Self {
        LdapSettings {
            use_ldaps: false,
            port: LDAP_PORT,
            connect_timeout: Duration::from_secs(LDAP_CONNECT_TIMEOUT_SECS),
            page_size: ROSTER_PAGE_SIZE,
            reachability_timeout: Duration::from_millis(REACHABILITY_TIMEOUT_MS),
        }
    }
}

impl LdapSettings {
    /// `ldap://host:port` or `ldaps://host:port`
    pub fn url_for(&self, host: &str) -> String {
        let scheme = if self.use_ldaps { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, host, self.port)
    }
}

/// Application settings
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub data_dir: PathBuf,
    pub ldap: LdapSettings,
    pub permission: PermissionCheckOptions,
    pub sync: SyncOptions,
    pub temp_password_prefix: String,
    pub verbose_logging: bool,
}

impl AppSettings {
    /// Settings rooted at `data_dir` with every other value at its default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        AppSettings {
            data_dir: data_dir.into(),
            ldap: LdapSettings::default(),
            permission: PermissionCheckOptions::default(),
            sync: SyncOptions::default(),
            temp_password_prefix: DEFAULT_TEMP_PASSWORD_PREFIX.to_string(),
            verbose_logging: false,
        }
    }

    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = match get(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir(&lookup),
        };
        let mut settings = AppSettings::with_data_dir(data_dir);

        if let Some(raw) = get(ENV_LDAPS) {
            settings.ldap.use_ldaps = parse_flag(ENV_LDAPS, &raw)?;
            if settings.ldap.use_ldaps {
                settings.ldap.port = LDAPS_PORT;
            }
        }
        if let Some(raw) = get(ENV_LDAP_PORT) {
            settings.ldap.port = parse_value(ENV_LDAP_PORT, &raw)?;
        }
        if let Some(raw) = get(ENV_CONNECT_TIMEOUT) {
            settings.ldap.connect_timeout =
                Duration::from_secs(parse_value(ENV_CONNECT_TIMEOUT, &raw)?);
        }
        if let Some(raw) = get(ENV_PAGE_SIZE) {
            let size: i32 = parse_value(ENV_PAGE_SIZE, &raw)?;
            if size <= 0 {
                return Err(invalid(ENV_PAGE_SIZE, &raw, "must be positive"));
            }
            settings.ldap.page_size = size;
        }
        if let Some(raw) = get(ENV_SAMPLE_SIZE) {
            let size: usize = parse_value(ENV_SAMPLE_SIZE, &raw)?;
            if size == 0 {
                return Err(invalid(ENV_SAMPLE_SIZE, &raw, "must be at least 1"));
            }
            settings.permission.sample_size = size;
        }
        if let Some(raw) = get(ENV_AGGREGATE_POLICY) {
            settings.permission.policy = AggregatePolicy::from_str(&raw)
                .map_err(|reason| invalid(ENV_AGGREGATE_POLICY, &raw, &reason))?;
        }
        if let Some(raw) = get(ENV_TASK_TIMEOUT) {
            let secs: u64 = parse_value(ENV_TASK_TIMEOUT, &raw)?;
            settings.sync.task_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(prefix) = get(ENV_TEMP_PASSWORD_PREFIX) {
            settings.temp_password_prefix = prefix;
        }
        if let Some(raw) = get(ENV_LOG_VERBOSE) {
            settings.verbose_logging = parse_flag(ENV_LOG_VERBOSE, &raw)?;
        }

        Ok(settings)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("Logs")
    }

    /// Persisted roster written by every synchronization
    pub fn user_list_path(&self) -> PathBuf {
        self.data_dir.join("UsersLists").join("UserList.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.data_dir.join("secrets.json")
    }
}

fn default_data_dir<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let base = lookup("LOCALAPPDATA")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| ".".to_string());
    Path::new(&base).join(APP_DIR_NAME)
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| invalid(key, raw, &e.to_string()))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean")),
    }
}
