//! Configuration for the countdown service and its backends

use chrono::{FixedOffset, NaiveTime};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use expiry_countdown_push::{AndroidPriority, DEFAULT_ENDPOINT};
use expiry_countdown_store::DEFAULT_PAGE_SIZE;

use crate::error::{Error, Result};

/// Asia/Bangkok, which observes no daylight saving
pub const BANGKOK_OFFSET_SECS: i32 = 7 * 3600;

/// Newest legacy items swept per run
pub const DEFAULT_FALLBACK_LIMIT: usize = 2000;

/// User-facing notification copy.
///
/// `body_template` understands `{name}`, `{days}` and `{date}`.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageCatalog {
    pub title: String,
    pub body_template: String,
    pub default_item_name: String,
    pub sample_item_name: String,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self {
            title: "วัตถุดิบใกล้หมดอายุ".to_string(),
            body_template: "{name} จะหมดอายุในอีก {days} วัน (หมดอายุ {date})".to_string(),
            default_item_name: "วัตถุดิบ".to_string(),
            sample_item_name: "ตัวอย่างวัตถุดิบ".to_string(),
        }
    }
}

impl MessageCatalog {
    pub fn body(&self, item_name: &str, days_left: i64, expiry_date: &str) -> String {
        self.body_template
            .replace("{name}", item_name)
            .replace("{days}", &days_left.to_string())
            .replace("{date}", expiry_date)
    }
}

/// Platform delivery hints attached to every push
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformHints {
    pub android_priority: AndroidPriority,
    pub android_ttl: Duration,
    pub apns_priority: String,
    pub sound: String,
    pub content_available: bool,
}

impl Default for PlatformHints {
    fn default() -> Self {
        Self {
            android_priority: AndroidPriority::High,
            android_ttl: Duration::from_secs(3600),
            apns_priority: "10".to_string(),
            sound: "default".to_string(),
            content_available: true,
        }
    }
}

/// Behaviour of a countdown run
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Offset whose calendar days define "today" and "days left"
    pub utc_offset: FixedOffset,

    /// Local time of the daily run
    pub run_at: NaiveTime,

    /// Size of the newest-first legacy item window
    pub fallback_limit: usize,

    /// Households notified concurrently
    pub max_concurrency: usize,

    pub messages: MessageCatalog,

    pub push_hints: PlatformHints,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            utc_offset: FixedOffset::east_opt(BANGKOK_OFFSET_SECS).expect("UTC+07:00 is in range"),
            run_at: NaiveTime::from_hms_opt(9, 0, 0).expect("09:00 is a valid time"),
            fallback_limit: DEFAULT_FALLBACK_LIMIT,
            max_concurrency: 32,
            messages: MessageCatalog::default(),
            push_hints: PlatformHints::default(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `EXPIRY_TZ_OFFSET` (`+07:00`), `EXPIRY_RUN_AT`
    /// (`09:00`), `EXPIRY_FALLBACK_LIMIT` and `EXPIRY_MAX_CONCURRENCY`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = optional_var("EXPIRY_TZ_OFFSET") {
            let offset = FixedOffset::from_str(&raw)
                .map_err(|e| Error::config(format!("EXPIRY_TZ_OFFSET `{}`: {}", raw, e)))?;
            config = config.with_utc_offset(offset);
        }
        if let Some(raw) = optional_var("EXPIRY_RUN_AT") {
            let run_at = NaiveTime::parse_from_str(&raw, "%H:%M")
                .map_err(|e| Error::config(format!("EXPIRY_RUN_AT `{}`: {}", raw, e)))?;
            config = config.with_run_at(run_at);
        }
        if let Some(raw) = optional_var("EXPIRY_FALLBACK_LIMIT") {
            config = config.with_fallback_limit(parse_positive("EXPIRY_FALLBACK_LIMIT", &raw)?);
        }
        if let Some(raw) = optional_var("EXPIRY_MAX_CONCURRENCY") {
            config = config.with_max_concurrency(parse_positive("EXPIRY_MAX_CONCURRENCY", &raw)?);
        }

        Ok(config)
    }

    pub fn with_utc_offset(mut self, value: FixedOffset) -> Self {
        self.utc_offset = value;
        self
    }

    pub fn with_run_at(mut self, value: NaiveTime) -> Self {
        self.run_at = value;
        self
    }

    pub fn with_fallback_limit(mut self, value: usize) -> Self {
        self.fallback_limit = value;
        self
    }

    /// Values below one are raised to one
    pub fn with_max_concurrency(mut self, value: usize) -> Self {
        self.max_concurrency = value.max(1);
        self
    }

    pub fn with_messages(mut self, value: MessageCatalog) -> Self {
        self.messages = value;
        self
    }

    pub fn with_push_hints(mut self, value: PlatformHints) -> Self {
        self.push_hints = value;
        self
    }
}

/// Connection settings for the Supabase project and FCM
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub supabase_url: String,
    pub supabase_key: String,
    pub fcm_project_id: String,
    pub fcm_access_token: String,
    pub fcm_endpoint: String,
    pub request_timeout: Option<Duration>,
    /// Rows per page when scanning items; at most the project's `max_rows`
    pub page_size: usize,
}

impl BackendConfig {
    pub fn new(
        supabase_url: &str,
        supabase_key: &str,
        fcm_project_id: &str,
        fcm_access_token: &str,
    ) -> Result<Self> {
        url::Url::parse(supabase_url)
            .map_err(|e| Error::config(format!("SUPABASE_URL `{}`: {}", supabase_url, e)))?;
        for (name, value) in [
            ("SUPABASE_SERVICE_KEY", supabase_key),
            ("FCM_PROJECT_ID", fcm_project_id),
            ("FCM_ACCESS_TOKEN", fcm_access_token),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{} cannot be empty", name)));
            }
        }

        Ok(Self {
            supabase_url: supabase_url.to_string(),
            supabase_key: supabase_key.to_string(),
            fcm_project_id: fcm_project_id.to_string(),
            fcm_access_token: fcm_access_token.to_string(),
            fcm_endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Reads `SUPABASE_URL`, `SUPABASE_SERVICE_KEY`, `FCM_PROJECT_ID`,
    /// `FCM_ACCESS_TOKEN` and the optional `FCM_ENDPOINT` and
    /// `SUPABASE_MAX_ROWS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new(
            &required_var("SUPABASE_URL")?,
            &required_var("SUPABASE_SERVICE_KEY")?,
            &required_var("FCM_PROJECT_ID")?,
            &required_var("FCM_ACCESS_TOKEN")?,
        )?;
        if let Some(endpoint) = optional_var("FCM_ENDPOINT") {
            config = config.with_fcm_endpoint(&endpoint);
        }
        if let Some(raw) = optional_var("SUPABASE_MAX_ROWS") {
            config = config.with_page_size(parse_positive("SUPABASE_MAX_ROWS", &raw)?);
        }
        Ok(config)
    }

    pub fn with_fcm_endpoint(mut self, value: &str) -> Self {
        self.fcm_endpoint = value.to_string();
        self
    }

    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Values below one are raised to one
    pub fn with_page_size(mut self, value: usize) -> Self {
        self.page_size = value.max(1);
        self
    }
}

fn required_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::config(format!("{} environment variable not found", name)))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_positive(name: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(Error::config(format!("{} must be a positive integer, got `{}`", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reference_is_bangkok_at_nine() {
        let config = ServiceConfig::default();
        assert_eq!(config.utc_offset.local_minus_utc(), 7 * 3600);
        assert_eq!(config.run_at, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(config.fallback_limit, 2000);
    }

    #[test]
    fn body_template_fills_placeholders() {
        let messages = MessageCatalog {
            body_template: "{name} expires in {days} day(s) ({date})".to_string(),
            ..MessageCatalog::default()
        };
        assert_eq!(
            messages.body("Milk", 2, "2024-03-03"),
            "Milk expires in 2 day(s) (2024-03-03)"
        );
    }

    #[test]
    fn backend_config_rejects_blank_credentials() {
        assert!(BackendConfig::new("http://localhost:54321", "key", "proj", "token").is_ok());
        assert!(matches!(
            BackendConfig::new("http://localhost:54321", " ", "proj", "token"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            BackendConfig::new("not a url", "key", "proj", "token"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn page_size_defaults_to_the_supabase_row_cap() {
        let config = BackendConfig::new("http://localhost:54321", "key", "proj", "token").unwrap();
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.with_page_size(0).page_size, 1);
    }

    #[test]
    fn concurrency_floor_is_one() {
        assert_eq!(ServiceConfig::default().with_max_concurrency(0).max_concurrency, 1);
    }
}
