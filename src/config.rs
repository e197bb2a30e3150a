use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;
/// Upper bound for every lifecycle window, ten years. Mirrored by the
/// `range(max = ...)` validators on [`BookingPolicy`].
const MAX_WINDOW_SECS: u64 = 3650 * DAY;

/// Windows and time-to-live values that drive the booking and contract lifecycle.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BookingPolicy {
    /// How long a contract signature token stays valid after generation
    #[serde(default = "default_signature_token_ttl_secs")]
    #[validate(range(min = 1, max = 315360000))]
    pub signature_token_ttl_secs: u64,

    /// How long a termination OTP stays valid after generation
    #[serde(default = "default_termination_otp_ttl_secs")]
    #[validate(range(min = 1, max = 315360000))]
    pub termination_otp_ttl_secs: u64,

    /// Age after which an unsigned pending contract is auto-canceled
    #[serde(default = "default_contract_signing_window_secs")]
    #[validate(range(min = 1, max = 315360000))]
    pub contract_signing_window_secs: u64,

    /// Age after which a booking can no longer be canceled by the customer
    #[serde(default = "default_cancel_lockout_secs")]
    #[validate(range(min = 1, max = 315360000))]
    pub cancel_lockout_secs: u64,

    /// Period after signing during which a contract may be terminated
    #[serde(default = "default_terminability_window_secs")]
    #[validate(range(min = 1, max = 315360000))]
    pub terminability_window_secs: u64,

    /// Reputation removed from a provider whose survey date lapsed
    #[serde(default = "default_survey_expiry_penalty")]
    #[validate(range(min = 0))]
    pub survey_expiry_penalty: i32,

    /// Base URL the signing link is built from
    #[serde(default = "default_signing_base_url")]
    #[validate(custom = "validate_signing_base_url")]
    pub signing_base_url: String,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            signature_token_ttl_secs: default_signature_token_ttl_secs(),
            termination_otp_ttl_secs: default_termination_otp_ttl_secs(),
            contract_signing_window_secs: default_contract_signing_window_secs(),
            cancel_lockout_secs: default_cancel_lockout_secs(),
            terminability_window_secs: default_terminability_window_secs(),
            survey_expiry_penalty: default_survey_expiry_penalty(),
            signing_base_url: default_signing_base_url(),
        }
    }
}

impl BookingPolicy {
    pub fn signature_token_ttl(&self) -> Duration {
        secs(self.signature_token_ttl_secs)
    }

    pub fn termination_otp_ttl(&self) -> Duration {
        secs(self.termination_otp_ttl_secs)
    }

    pub fn contract_signing_window(&self) -> Duration {
        secs(self.contract_signing_window_secs)
    }

    pub fn cancel_lockout(&self) -> Duration {
        secs(self.cancel_lockout_secs)
    }

    pub fn terminability_window(&self) -> Duration {
        secs(self.terminability_window_secs)
    }
}

/// Scheduling of the background sweeps.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct JobSettings {
    /// Delay before the first run of every job
    #[serde(default = "default_job_warmup_secs")]
    pub warmup_secs: u64,

    #[serde(default = "default_contract_job_interval_secs")]
    #[validate(range(min = 1))]
    pub contract_interval_secs: u64,

    #[serde(default = "default_booking_job_interval_secs")]
    #[validate(range(min = 1))]
    pub booking_interval_secs: u64,

    #[serde(default = "default_service_job_interval_secs")]
    #[validate(range(min = 1))]
    pub service_interval_secs: u64,

    #[serde(default = "default_meeting_job_interval_secs")]
    #[validate(range(min = 1))]
    pub meeting_interval_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            warmup_secs: default_job_warmup_secs(),
            contract_interval_secs: default_contract_job_interval_secs(),
            booking_interval_secs: default_booking_job_interval_secs(),
            service_interval_secs: default_service_job_interval_secs(),
            meeting_interval_secs: default_meeting_job_interval_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Create missing tables on startup
    #[serde(default)]
    pub auto_create_schema: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub booking: BookingPolicy,

    #[serde(default)]
    #[validate]
    pub jobs: JobSettings,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the connection target.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_create_schema: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            booking: BookingPolicy::default(),
            jobs: JobSettings::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_WINDOW_SECS) as i64)
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_event_channel_capacity() -> usize {
    1024
}
fn default_signature_token_ttl_secs() -> u64 {
    2 * DAY
}
fn default_termination_otp_ttl_secs() -> u64 {
    10 * 60
}
fn default_contract_signing_window_secs() -> u64 {
    2 * DAY
}
fn default_cancel_lockout_secs() -> u64 {
    2 * DAY
}
fn default_terminability_window_secs() -> u64 {
    3 * DAY
}
fn default_survey_expiry_penalty() -> i32 {
    10
}
fn default_signing_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_job_warmup_secs() -> u64 {
    30
}
fn default_contract_job_interval_secs() -> u64 {
    HOUR
}
fn default_booking_job_interval_secs() -> u64 {
    HOUR
}
fn default_service_job_interval_secs() -> u64 {
    DAY
}
fn default_meeting_job_interval_secs() -> u64 {
    60
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_signing_base_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => {
            let mut err = ValidationError::new("signing_base_url");
            err.message = Some("signing_base_url must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("decor_marketplace={},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*), e.g. `APP__BOOKING__SIGNATURE_TOKEN_TTL_SECS`
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://decor.db?mode=rwc")?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_marketplace_rules() {
        let policy = BookingPolicy::default();
        assert_eq!(policy.signature_token_ttl(), Duration::hours(48));
        assert_eq!(policy.termination_otp_ttl(), Duration::minutes(10));
        assert_eq!(policy.cancel_lockout(), Duration::days(2));
        assert_eq!(policy.terminability_window(), Duration::days(3));
        assert_eq!(policy.survey_expiry_penalty, 10);
        assert!(policy.termination_otp_ttl() < policy.signature_token_ttl());
    }

    #[test]
    fn new_config_is_valid() {
        let cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        assert!(cfg.validate().is_ok());
        assert!(!cfg.is_production());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_relative_signing_url() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        cfg.booking.signing_base_url = "contracts/sign".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_windows_longer_than_ten_years() {
        assert_eq!(MAX_WINDOW_SECS, 315360000);

        let mut cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        cfg.booking.terminability_window_secs = MAX_WINDOW_SECS;
        assert!(cfg.validate().is_ok());

        cfg.booking.terminability_window_secs = MAX_WINDOW_SECS + 1;
        assert!(cfg.validate().is_err());

        cfg.booking.terminability_window_secs = 60;
        cfg.booking.signature_token_ttl_secs = u64::MAX;
        assert!(cfg.validate().is_err());
        // Unvalidated policies still yield a usable duration.
        assert_eq!(
            cfg.booking.signature_token_ttl(),
            Duration::seconds(MAX_WINDOW_SECS as i64)
        );
    }

    #[test]
    fn deserializes_nested_overrides() {
        let config = Config::builder()
            .set_default("database_url", "sqlite::memory:")
            .unwrap()
            .set_default("environment", "test")
            .unwrap()
            .set_override("booking.termination_otp_ttl_secs", 120)
            .unwrap()
            .set_override("jobs.warmup_secs", 0)
            .unwrap()
            .build()
            .unwrap();
        let cfg: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(cfg.booking.termination_otp_ttl(), Duration::minutes(2));
        assert_eq!(cfg.booking.cancel_lockout(), Duration::days(2));
        assert_eq!(cfg.jobs.warmup_secs, 0);
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staging.toml");
        std::fs::write(
            &path,
            "database_url = \"sqlite::memory:\"\n\
             environment = \"staging\"\n\
             [booking]\n\
             survey_expiry_penalty = 25\n\
             signing_base_url = \"https://decor.example.com/app/\"\n",
        )
        .unwrap();

        let cfg: AppConfig = Config::builder()
            .add_source(File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.booking.survey_expiry_penalty, 25);
        assert_eq!(cfg.booking.signature_token_ttl(), Duration::hours(48));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.toml");
        std::fs::write(
            &path,
            "database_url = \"sqlite::memory:\"\n\
             environment = \"test\"\n\
             [booking]\n\
             signature_ttl = 60\n",
        )
        .unwrap();

        let result = Config::builder()
            .add_source(File::from(path))
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>();
        assert!(result.is_err());
    }
}
