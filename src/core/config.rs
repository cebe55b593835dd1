use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// "local" or "production"; production enforces strict validation.
    pub environment: String,
}

impl RuntimeSettings {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub ocr_base_url: String,
    pub ocr_api_key: String,
    pub openai_base_url: String,
    pub openai_api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub min_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct MessagingSettings {
    pub enabled: bool,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub max_concurrent_submissions: usize,
    pub poll_interval_seconds: u64,
    pub poll_concurrency: usize,
    pub max_poll_attempts: i32,
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cool_down_seconds: u64,
    pub max_session_restarts: u32,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub runtime: RuntimeSettings,
    pub database: DatabaseSettings,
    pub portal: PortalSettings,
    pub extraction: ExtractionSettings,
    pub messaging: MessagingSettings,
    pub processing: ProcessingSettings,
    pub telemetry: TelemetrySettings,
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn parse_u16(key: &str, default: u16) -> Result<u16, ConfigError> {
    parse_with(key, default, str::parse::<u16>)
}

fn parse_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    parse_with(key, default, str::parse::<u32>)
}

fn parse_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    parse_with(key, default, str::parse::<u64>)
}

fn parse_i32(key: &str, default: i32) -> Result<i32, ConfigError> {
    parse_with(key, default, str::parse::<i32>)
}

fn parse_usize(key: &str, default: usize) -> Result<usize, ConfigError> {
    parse_with(key, default, str::parse::<usize>)
}

fn parse_f64(key: &str, default: f64) -> Result<f64, ConfigError> {
    parse_with(key, default, str::parse::<f64>)
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    parse_with(key, default, |v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(()),
    })
}

fn parse_with<T, E>(
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse(raw.trim())
            .map_err(|_| ConfigError::Invalid { key: key.to_string(), value: raw }),
        _ => Ok(default),
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let runtime = RuntimeSettings {
            environment: env_or_default("CLAIMFLOW_ENVIRONMENT", "local"),
        };

        let database = DatabaseSettings {
            url: required("DATABASE_URL")?,
            max_connections: parse_u32("CLAIMFLOW_DB_MAX_CONNECTIONS", 10)?,
            acquire_timeout_seconds: parse_u64("CLAIMFLOW_DB_ACQUIRE_TIMEOUT_SECONDS", 5)?,
        };

        let portal = PortalSettings {
            base_url: env_or_default("CLAIMFLOW_PORTAL_BASE_URL", "https://portal.invalid"),
            username: env_or_default("CLAIMFLOW_PORTAL_USERNAME", ""),
            password: env_or_default("CLAIMFLOW_PORTAL_PASSWORD", ""),
            timeout_seconds: parse_u64("CLAIMFLOW_PORTAL_TIMEOUT_SECONDS", 30)?,
        };

        let extraction = ExtractionSettings {
            ocr_base_url: env_or_default("CLAIMFLOW_OCR_BASE_URL", "https://ocr.invalid"),
            ocr_api_key: env_or_default("CLAIMFLOW_OCR_API_KEY", ""),
            openai_base_url: env_or_default(
                "CLAIMFLOW_OPENAI_BASE_URL",
                "https://api.openai.com/v1",
            ),
            openai_api_key: env_or_default("CLAIMFLOW_OPENAI_API_KEY", ""),
            model: env_or_default("CLAIMFLOW_EXTRACTION_MODEL", "gpt-4-turbo-preview"),
            max_tokens: parse_u32("CLAIMFLOW_EXTRACTION_MAX_TOKENS", 1000)?,
            timeout_seconds: parse_u64("CLAIMFLOW_EXTRACTION_TIMEOUT_SECONDS", 60)?,
            min_confidence: parse_f64("CLAIMFLOW_EXTRACTION_MIN_CONFIDENCE", 0.6)?,
        };

        let messaging = MessagingSettings {
            enabled: parse_bool("CLAIMFLOW_MESSAGING_ENABLED", false)?,
            account_sid: env_or_default("CLAIMFLOW_TWILIO_ACCOUNT_SID", ""),
            auth_token: env_or_default("CLAIMFLOW_TWILIO_AUTH_TOKEN", ""),
            from_number: env_or_default("CLAIMFLOW_TWILIO_FROM_NUMBER", ""),
        };

        let processing = ProcessingSettings {
            max_concurrent_submissions: parse_usize("CLAIMFLOW_MAX_CONCURRENT_SUBMISSIONS", 3)?,
            poll_interval_seconds: parse_u64("CLAIMFLOW_POLL_INTERVAL_SECONDS", 3600)?,
            poll_concurrency: parse_usize("CLAIMFLOW_POLL_CONCURRENCY", 8)?,
            max_poll_attempts: parse_i32("CLAIMFLOW_MAX_POLL_ATTEMPTS", 48)?,
            max_retries: parse_u32("CLAIMFLOW_MAX_RETRIES", 3)?,
            retry_initial_delay_ms: parse_u64("CLAIMFLOW_RETRY_INITIAL_DELAY_MS", 1000)?,
            retry_max_delay_ms: parse_u64("CLAIMFLOW_RETRY_MAX_DELAY_MS", 60_000)?,
            breaker_failure_threshold: parse_u32("CLAIMFLOW_BREAKER_FAILURE_THRESHOLD", 5)?,
            breaker_cool_down_seconds: parse_u64("CLAIMFLOW_BREAKER_COOL_DOWN_SECONDS", 300)?,
            max_session_restarts: parse_u32("CLAIMFLOW_MAX_SESSION_RESTARTS", 1)?,
        };

        let telemetry = TelemetrySettings {
            metrics_enabled: parse_bool("CLAIMFLOW_METRICS_ENABLED", false)?,
            metrics_port: parse_u16("CLAIMFLOW_METRICS_PORT", 9000)?,
        };

        let settings =
            Self { runtime, database, portal, extraction, messaging, processing, telemetry };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.extraction.min_confidence) {
            return Err(ConfigError::Invalid {
                key: "CLAIMFLOW_EXTRACTION_MIN_CONFIDENCE".into(),
                value: self.extraction.min_confidence.to_string(),
            });
        }
        if self.processing.max_concurrent_submissions == 0 {
            return Err(ConfigError::Invalid {
                key: "CLAIMFLOW_MAX_CONCURRENT_SUBMISSIONS".into(),
                value: "0".into(),
            });
        }
        if self.processing.poll_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "CLAIMFLOW_POLL_CONCURRENCY".into(),
                value: "0".into(),
            });
        }

        if self.runtime.is_production() {
            for (key, value) in [
                ("CLAIMFLOW_PORTAL_USERNAME", &self.portal.username),
                ("CLAIMFLOW_PORTAL_PASSWORD", &self.portal.password),
                ("CLAIMFLOW_OCR_API_KEY", &self.extraction.ocr_api_key),
                ("CLAIMFLOW_OPENAI_API_KEY", &self.extraction.openai_api_key),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Missing(key.to_string()));
                }
            }
            if self.messaging.enabled
                && (self.messaging.account_sid.trim().is_empty()
                    || self.messaging.auth_token.trim().is_empty())
            {
                return Err(ConfigError::Missing("CLAIMFLOW_TWILIO_ACCOUNT_SID".into()));
            }
        }
        Ok(())
    }
}
