//! Environment-driven configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `INVENTORY_SOURCE_PATH` | unset (use the fixture) |
//! | `INVENTORY_FIXTURE_PATH` | `data/mock_products.csv` |
//! | `INVENTORY_FIXTURE_FALLBACK` | `true` |
//! | `INVENTORY_LOW_STOCK_THRESHOLD` | `10` |
//! | `INVENTORY_RECENT_WINDOW_HOURS` | `24` |
//! | `INVENTORY_REPORT_MAX_ERRORS` | `10` |
//! | `INVENTORY_TRENDING_WINDOW_DAYS` | `30` |
//! | `INVENTORY_TRENDING_LIMIT` | `5` |
//! | `INVENTORY_REPORT_RECIPIENTS` | `admin@example.com` |
//! | `INVENTORY_REPORT_FROM` | `noreply@example.com` |
//! | `INVENTORY_NOTIFY_URL` | unset (log-only delivery) |
//! | `INVENTORY_NOTIFY_TOKEN` | unset |
//! | `DATABASE_URL` | unset (in-memory store) |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Report stage settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    /// Products with a quantity strictly below this count as low stock.
    pub low_stock_threshold: i64,
    pub recent_window: Duration,
    /// How many per-record errors the report body lists before summarizing.
    pub max_listed_errors: usize,
    /// Ledger window the trending lists are computed over.
    pub trending_window: Duration,
    /// Products per trending list.
    pub trending_limit: usize,
    pub recipients: Vec<String>,
    pub from: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: 10,
            recent_window: Duration::hours(24),
            max_listed_errors: 10,
            trending_window: Duration::days(30),
            trending_limit: 5,
            recipients: vec!["admin@example.com".to_string()],
            from: "noreply@example.com".to_string(),
        }
    }
}

impl ReportConfig {
    pub fn with_low_stock_threshold(mut self, threshold: i64) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    pub fn with_recent_window(mut self, window: Duration) -> Self {
        self.recent_window = window;
        self
    }

    pub fn with_max_listed_errors(mut self, max: usize) -> Self {
        self.max_listed_errors = max;
        self
    }

    pub fn with_trending_window(mut self, window: Duration) -> Self {
        self.trending_window = window;
        self
    }

    pub fn with_trending_limit(mut self, limit: usize) -> Self {
        self.trending_limit = limit;
        self
    }

    pub fn with_recipients<I, T>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }
}

/// Where the ingest stage reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Explicit source. `None` means "use the fixture".
    pub path: Option<PathBuf>,
    pub fixture_path: PathBuf,
    /// Fall back to the fixture when `path` is unset or missing.
    pub fixture_fallback: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            fixture_path: PathBuf::from("data/mock_products.csv"),
            fixture_fallback: true,
        }
    }
}

impl SourceConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_fixture_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fixture_path = path.into();
        self
    }

    pub fn with_fixture_fallback(mut self, enabled: bool) -> Self {
        self.fixture_fallback = enabled;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub report: ReportConfig,
    pub notify_url: Option<String>,
    pub notify_token: Option<String>,
    pub database_url: Option<String>,
}

impl PipelineConfig {
    /// Load from the process environment, reading a `.env` file first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset and blank values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let source = SourceConfig {
            path: get("INVENTORY_SOURCE_PATH").map(PathBuf::from),
            fixture_path: get("INVENTORY_FIXTURE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.source.fixture_path),
            fixture_fallback: parse_bool(
                "INVENTORY_FIXTURE_FALLBACK",
                get("INVENTORY_FIXTURE_FALLBACK"),
                defaults.source.fixture_fallback,
            )?,
        };

        let window_hours = positive(
            "INVENTORY_RECENT_WINDOW_HOURS",
            parse(
                "INVENTORY_RECENT_WINDOW_HOURS",
                get("INVENTORY_RECENT_WINDOW_HOURS"),
                defaults.report.recent_window.num_hours(),
            )?,
        )?;
        let trending_days = positive(
            "INVENTORY_TRENDING_WINDOW_DAYS",
            parse(
                "INVENTORY_TRENDING_WINDOW_DAYS",
                get("INVENTORY_TRENDING_WINDOW_DAYS"),
                defaults.report.trending_window.num_days(),
            )?,
        )?;

        let recipients: Vec<String> = match get("INVENTORY_REPORT_RECIPIENTS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.report.recipients,
        };
        if recipients.is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "INVENTORY_REPORT_RECIPIENTS".to_string(),
                message: "at least one recipient is required".to_string(),
            });
        }

        let report = ReportConfig {
            low_stock_threshold: parse(
                "INVENTORY_LOW_STOCK_THRESHOLD",
                get("INVENTORY_LOW_STOCK_THRESHOLD"),
                defaults.report.low_stock_threshold,
            )?,
            recent_window: Duration::hours(window_hours),
            max_listed_errors: parse(
                "INVENTORY_REPORT_MAX_ERRORS",
                get("INVENTORY_REPORT_MAX_ERRORS"),
                defaults.report.max_listed_errors,
            )?,
            trending_window: Duration::days(trending_days),
            trending_limit: parse(
                "INVENTORY_TRENDING_LIMIT",
                get("INVENTORY_TRENDING_LIMIT"),
                defaults.report.trending_limit,
            )?,
            recipients,
            from: get("INVENTORY_REPORT_FROM").unwrap_or(defaults.report.from),
        };

        Ok(Self {
            source,
            report,
            notify_url: get("INVENTORY_NOTIFY_URL"),
            notify_token: get("INVENTORY_NOTIFY_TOKEN"),
            database_url: get("DATABASE_URL"),
        })
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    pub fn with_report(mut self, report: ReportConfig) -> Self {
        self.report = report;
        self
    }
}

fn parse<T>(var: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            message: e.to_string(),
        }),
    }
}

fn positive(var: &str, value: i64) -> Result<i64, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidValue {
            var: var.to_string(),
            message: "must be positive".to_string(),
        });
    }
    Ok(value)
}

fn parse_bool(var: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(load(&[]).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn recipients_are_split_and_trimmed() {
        let cfg = load(&[("INVENTORY_REPORT_RECIPIENTS", "a@x.io, b@x.io ,")]).unwrap();
        assert_eq!(cfg.report.recipients, vec!["a@x.io", "b@x.io"]);
    }

    #[test]
    fn recipient_list_without_addresses_is_rejected() {
        for raw in [",", " , ,"] {
            let err = load(&[("INVENTORY_REPORT_RECIPIENTS", raw)]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "INVENTORY_REPORT_RECIPIENTS"));
        }
    }

    #[test]
    fn trending_settings_are_read() {
        let cfg = load(&[
            ("INVENTORY_TRENDING_WINDOW_DAYS", "7"),
            ("INVENTORY_TRENDING_LIMIT", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.report.trending_window, Duration::days(7));
        assert_eq!(cfg.report.trending_limit, 3);
        assert!(load(&[("INVENTORY_TRENDING_WINDOW_DAYS", "-1")]).is_err());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("INVENTORY_SOURCE_PATH", "/tmp/in.csv"),
            ("INVENTORY_FIXTURE_FALLBACK", "no"),
            ("INVENTORY_LOW_STOCK_THRESHOLD", "3"),
            ("INVENTORY_RECENT_WINDOW_HOURS", "48"),
            ("DATABASE_URL", "postgres://localhost/inv"),
        ])
        .unwrap();
        assert_eq!(cfg.source.path, Some(PathBuf::from("/tmp/in.csv")));
        assert!(!cfg.source.fixture_fallback);
        assert_eq!(cfg.report.low_stock_threshold, 3);
        assert_eq!(cfg.report.recent_window, Duration::hours(48));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/inv"));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = load(&[("INVENTORY_LOW_STOCK_THRESHOLD", "ten")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "INVENTORY_LOW_STOCK_THRESHOLD"));
        assert!(load(&[("INVENTORY_RECENT_WINDOW_HOURS", "0")]).is_err());
    }
}
