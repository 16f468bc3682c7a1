//! Environment-driven settings.
//!
//! | Variable                   | Default                       |
//! |----------------------------|-------------------------------|
//! | `MODELBENCH_CONCURRENCY`   | `1`                           |
//! | `MODELBENCH_DELAY_MS`      | `0`                           |
//! | `MODELBENCH_MAX_RETRIES`   | `3`                           |
//! | `MODELBENCH_BRANCH_PREFIX` | `bench`                       |
//! | `MODELBENCH_STORE`         | `surrealkv://.modelbench/db`  |
//! | `MODELBENCH_LOG_FORMAT`    | text (`json` for JSON lines)  |

use std::str::FromStr;

use modelbench_state::{DEFAULT_STORE_URL, STORE_URL_ENV};

use crate::domain::{BenchError, ModelConfig, Result, RunConfig};
use crate::execution::DEFAULT_MAX_RETRIES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchSettings {
    pub concurrency: usize,
    pub delay_ms: u64,
    pub max_retries: u32,
    pub branch_prefix: String,
    pub store_url: String,
    pub json_logs: bool,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            delay_ms: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            branch_prefix: "bench".to_string(),
            store_url: DEFAULT_STORE_URL.to_string(),
            json_logs: false,
        }
    }
}

impl BenchSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; unset keys keep their defaults.
    ///
    /// A value that is set but does not parse is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(v) = parse(&lookup, "MODELBENCH_CONCURRENCY")? {
            settings.concurrency = v;
        }
        if let Some(v) = parse(&lookup, "MODELBENCH_DELAY_MS")? {
            settings.delay_ms = v;
        }
        if let Some(v) = parse(&lookup, "MODELBENCH_MAX_RETRIES")? {
            settings.max_retries = v;
        }
        if let Some(v) = lookup("MODELBENCH_BRANCH_PREFIX").filter(|v| !v.trim().is_empty()) {
            settings.branch_prefix = v;
        }
        if let Some(v) = lookup(STORE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            settings.store_url = v;
        }
        if let Some(v) = lookup("MODELBENCH_LOG_FORMAT") {
            settings.json_logs = v.eq_ignore_ascii_case("json");
        }
        Ok(settings)
    }

    /// Build a validated run configuration with these scheduling knobs.
    pub fn run_config(&self, models: Vec<ModelConfig>) -> Result<RunConfig> {
        Ok(RunConfig::new(models, self.concurrency, self.delay_ms)?)
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BenchError::Settings(format!("{key}: cannot parse '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let settings = BenchSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, BenchSettings::default());
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.store_url, "surrealkv://.modelbench/db");
    }

    #[test]
    fn overrides_are_applied() {
        let settings = BenchSettings::from_lookup(lookup(&[
            ("MODELBENCH_CONCURRENCY", "4"),
            ("MODELBENCH_DELAY_MS", "250"),
            ("MODELBENCH_BRANCH_PREFIX", "eval"),
            ("MODELBENCH_STORE", "mem://"),
            ("MODELBENCH_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.delay_ms, 250);
        assert_eq!(settings.branch_prefix, "eval");
        assert_eq!(settings.store_url, "mem://");
        assert!(settings.json_logs);
    }

    #[test]
    fn bad_number_is_an_error() {
        let err = BenchSettings::from_lookup(lookup(&[("MODELBENCH_DELAY_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, BenchError::Settings(msg) if msg.contains("MODELBENCH_DELAY_MS")));
    }

    #[test]
    fn zero_concurrency_is_rejected_at_run_config() {
        let settings = BenchSettings::from_lookup(lookup(&[("MODELBENCH_CONCURRENCY", "0")]))
            .unwrap();
        let models = vec!["a:x".parse().unwrap()];
        assert!(settings.run_config(models).unwrap_err().is_validation());
    }
}
