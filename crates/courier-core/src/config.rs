//! Config - ファイル + 環境変数による設定
//!
//! 1. TOML ファイル（任意、無ければ全セクションが既定値）
//! 2. `.env` を読み込み（dotenvy）
//! 3. `COURIER_*` 環境変数で上書き
//! 4. `validate()` で検証（失敗はすべて `CourierError::Config`）

use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::app::{DeliveryConfig, DeliveryMode, PollSettings};
use crate::domain::CourierError;
use crate::ports::LocalZone;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseSection,
    pub clock: ClockSection,
    pub delivery: DeliverySection,
    pub poll: PollSection,
    pub scheduler: SchedulerSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite://courier.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClockSection {
    /// School-local offset such as `+08:00`.
    pub utc_offset: String,
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            utc_offset: "+08:00".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeliverySection {
    pub mode: String,
    pub callback_url: Option<String>,
    pub poll_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub batch_size: usize,
    pub autostart: bool,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            mode: "log".into(),
            callback_url: None,
            poll_interval_secs: 5,
            http_timeout_secs: 5,
            batch_size: 50,
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PollSection {
    pub cadence_ms: u64,
    pub batch_size: usize,
    pub max_timeout_secs: u64,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            cadence_ms: 800,
            batch_size: 10,
            max_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub reminder_interval_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            reminder_interval_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseSection::default(),
            clock: ClockSection::default(),
            delivery: DeliverySection::default(),
            poll: PollSection::default(),
            scheduler: SchedulerSection::default(),
        }
    }
}

impl Config {
    /// File (if given) + `.env` + environment, validated.
    pub fn load(path: Option<&Path>) -> Result<Self, CourierError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    CourierError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };

        // a missing .env is fine
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, CourierError> {
        toml::from_str(content).map_err(|e| CourierError::Config(format!("invalid config file: {e}")))
    }

    /// Apply `COURIER_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("COURIER_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(offset) = lookup("COURIER_UTC_OFFSET") {
            self.clock.utc_offset = offset;
        }
        if let Some(mode) = lookup("COURIER_DELIVERY_MODE") {
            self.delivery.mode = mode;
        }
        if let Some(url) = lookup("COURIER_CALLBACK_URL") {
            self.delivery.callback_url = Some(url).filter(|u| !u.trim().is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), CourierError> {
        if self.database.url.trim().is_empty() {
            return Err(CourierError::Config("database url is empty".into()));
        }
        self.zone()?;
        self.delivery_config()?.validate()?;
        if self.poll.cadence_ms == 0 || self.poll.batch_size == 0 {
            return Err(CourierError::Config(
                "poll cadence and batch size must be positive".into(),
            ));
        }
        if self.scheduler.reminder_interval_secs == 0 {
            return Err(CourierError::Config(
                "reminder interval must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn zone(&self) -> Result<LocalZone, CourierError> {
        parse_offset(&self.clock.utc_offset).map(LocalZone::new)
    }

    pub fn delivery_config(&self) -> Result<DeliveryConfig, CourierError> {
        Ok(DeliveryConfig {
            mode: self.delivery.mode.parse::<DeliveryMode>()?,
            callback_url: self.delivery.callback_url.clone(),
            poll_interval: Duration::from_secs(self.delivery.poll_interval_secs),
            http_timeout: Duration::from_secs(self.delivery.http_timeout_secs),
            batch_size: self.delivery.batch_size,
        })
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            cadence: Duration::from_millis(self.poll.cadence_ms),
            batch_size: self.poll.batch_size,
            max_timeout: Duration::from_secs(self.poll.max_timeout_secs),
        }
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.reminder_interval_secs)
    }
}

/// `+HH:MM` / `-HH:MM` (also `Z`) into a fixed offset.
fn parse_offset(s: &str) -> Result<FixedOffset, CourierError> {
    let invalid = || CourierError::Config(format!("malformed utc offset '{s}' (expected +HH:MM)"));
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let (sign, rest) = match s.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.zone().unwrap().offset().local_minus_utc(), 8 * 3600);
        assert_eq!(config.poll_settings(), PollSettings::default());
        assert_eq!(config.delivery_config().unwrap(), DeliveryConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [delivery]
            mode = "http"
            callback_url = "http://127.0.0.1:8080/hook"

            [poll]
            cadence_ms = 250
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.delivery.mode, "http");
        assert_eq!(config.delivery.batch_size, 50);
        assert_eq!(config.poll.cadence_ms, 250);
        assert_eq!(config.poll.max_timeout_secs, 60);
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(matches!(
            Config::from_toml("[smtp]\nhost = \"x\""),
            Err(CourierError::Config(_))
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("COURIER_DATABASE_URL", "sqlite::memory:"),
            ("COURIER_UTC_OFFSET", "-05:30"),
            ("COURIER_DELIVERY_MODE", "http"),
            ("COURIER_CALLBACK_URL", "https://hooks.example/queue"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        config.validate().unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.zone().unwrap().offset().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(config.delivery_config().unwrap().mode, DeliveryMode::Http);
    }

    #[rstest]
    #[case::unknown_mode("mode = \"smtp\"")]
    #[case::http_without_callback("mode = \"http\"")]
    #[case::relative_callback("mode = \"http\"\ncallback_url = \"/hook\"")]
    #[case::zero_interval("poll_interval_secs = 0")]
    fn invalid_delivery_sections(#[case] body: &str) {
        let config = Config::from_toml(&format!("[delivery]\n{body}")).unwrap();
        assert!(matches!(config.validate(), Err(CourierError::Config(_))));
    }

    #[rstest]
    #[case("+08:00", 8 * 3600)]
    #[case("-03:30", -(3 * 3600 + 30 * 60))]
    #[case("Z", 0)]
    fn offsets_parse(#[case] input: &str, #[case] seconds: i32) {
        assert_eq!(parse_offset(input).unwrap().local_minus_utc(), seconds);
    }

    #[rstest]
    #[case("08:00")]
    #[case("+8")]
    #[case("+25:00")]
    #[case("Asia/Shanghai")]
    fn malformed_offsets_are_config_errors(#[case] input: &str) {
        assert!(matches!(parse_offset(input), Err(CourierError::Config(_))));
    }
}
