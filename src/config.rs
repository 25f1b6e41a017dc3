use std::env;

use crate::models::Period;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a whole number of days (got '{value}')")]
    InvalidDays { name: &'static str, value: String },
    #[error("{name} must be true or false (got '{value}')")]
    InvalidFlag { name: &'static str, value: String },
    #[error("DATABASE_URL must be set to a Postgres instance")]
    MissingDatabaseUrl,
}

/// Domain constants used by the averaging and simulation service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradingPolicy {
    /// Share of the final average for periods 1, 2 and 3.
    pub period_weights: [f64; 3],
    /// Recorded weights are summed across all periods and divided by this.
    pub completed_weight_divisor: f64,
    pub passing_grade: f64,
    /// When set, reachability is judged on the clamped required score, which
    /// makes "not reachable" practically impossible. Clear it to judge the
    /// raw required score instead.
    pub reachability_checks_clamped_value: bool,
}

impl GradingPolicy {
    pub fn period_weight(&self, period: Period) -> f64 {
        self.period_weights[period.index()]
    }
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            period_weights: [0.30, 0.30, 0.40],
            completed_weight_divisor: 3.0,
            passing_grade: 3.0,
            reachability_checks_clamped_value: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppealPolicy {
    /// Stricter threshold enforced when a student files an appeal.
    pub filing_min_chars: usize,
    pub default_window_days: i64,
    pub filing_window_days: i64,
}

impl Default for AppealPolicy {
    fn default() -> Self {
        Self {
            filing_min_chars: 50,
            default_window_days: 3,
            filing_window_days: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub log_filter: String,
    pub grading: GradingPolicy,
    pub appeals: AppealPolicy,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut grading = GradingPolicy::default();
        let mut appeals = AppealPolicy::default();

        if let Some(value) = lookup("GRADEBOOK_APPEAL_FILING_DAYS") {
            appeals.filing_window_days = parse_days("GRADEBOOK_APPEAL_FILING_DAYS", &value)?;
        }
        if let Some(value) = lookup("GRADEBOOK_APPEAL_WINDOW_DAYS") {
            appeals.default_window_days = parse_days("GRADEBOOK_APPEAL_WINDOW_DAYS", &value)?;
        }
        if let Some(value) = lookup("GRADEBOOK_REACHABILITY_PRE_CLAMP") {
            let pre_clamp = parse_flag("GRADEBOOK_REACHABILITY_PRE_CLAMP", &value)?;
            grading.reachability_checks_clamped_value = !pre_clamp;
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            log_filter: lookup("GRADEBOOK_LOG").unwrap_or_else(|| "info".to_string()),
            grading,
            appeals,
        })
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

fn parse_days(name: &'static str, value: &str) -> Result<i64, ConfigError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|days| *days >= 0)
        .ok_or_else(|| ConfigError::InvalidDays {
            name,
            value: value.to_string(),
        })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_keep_both_appeal_windows_distinct() {
        let config = load(&[]).unwrap();
        assert_eq!(config.appeals.default_window_days, 3);
        assert_eq!(config.appeals.filing_window_days, 5);
        assert_eq!(config.appeals.filing_min_chars, 50);
        assert_eq!(config.log_filter, "info");
        assert!(config.grading.reachability_checks_clamped_value);
        assert!(matches!(
            config.database_url(),
            Err(ConfigError::MissingDatabaseUrl)
        ));
    }

    #[test]
    fn overrides_come_from_environment() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/gradebook"),
            ("GRADEBOOK_APPEAL_FILING_DAYS", "7"),
            ("GRADEBOOK_REACHABILITY_PRE_CLAMP", "true"),
        ])
        .unwrap();
        assert_eq!(config.appeals.filing_window_days, 7);
        assert!(!config.grading.reachability_checks_clamped_value);
        assert_eq!(
            config.database_url().unwrap(),
            "postgres://localhost/gradebook"
        );
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            load(&[("GRADEBOOK_APPEAL_WINDOW_DAYS", "-1")]),
            Err(ConfigError::InvalidDays { .. })
        ));
        assert!(matches!(
            load(&[("GRADEBOOK_REACHABILITY_PRE_CLAMP", "maybe")]),
            Err(ConfigError::InvalidFlag { .. })
        ));
    }

    #[test]
    fn default_period_weights_total_one() {
        let policy = GradingPolicy::default();
        let total: f64 = policy.period_weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(policy.period_weight(Period::Third), 0.40);
    }
}
