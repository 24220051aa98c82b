//! Tracing bootstrap for the provider process.
//!
//! Filter precedence:
//! 1) `RUST_LOG`
//! 2) `CONVERGE_LOG`
//! 3) internal default filter
//!
//! A variable that is set but blank, or that does not parse as a filter, is
//! skipped in favour of the next one.

use std::env;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Provider-specific filter variable, consulted when `RUST_LOG` is unset.
pub const LOG_ENV_VAR: &str = "CONVERGE_LOG";

const DEFAULT_FILTER: &str = "info,reconcile=info,provider=info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format {0:?}; expected \"text\" or \"json\"")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(UnknownLogFormat(s.to_string())),
        }
    }
}

/// Installs the global subscriber.
///
/// Returns `false` if a subscriber was already installed; calling this more
/// than once is harmless.
pub fn init(format: LogFormat) -> bool {
    let filter = filter_from_lookup(|key| env::var(key).ok());
    let installed = match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_target(true)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .try_init(),
    };
    installed.is_ok()
}

/// Builds the filter from variables supplied by `lookup`.
pub fn filter_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    for key in [EnvFilter::DEFAULT_ENV, LOG_ENV_VAR] {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
            if let Ok(filter) = EnvFilter::try_new(value) {
                return filter;
            }
        }
    }
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn rust_log_takes_precedence() {
        let filter = filter_from_lookup(lookup(&[("RUST_LOG", "warn"), (LOG_ENV_VAR, "trace")]));
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn provider_variable_is_used_when_rust_log_is_unset_or_blank() {
        let filter = filter_from_lookup(lookup(&[(LOG_ENV_VAR, "debug")]));
        assert_eq!(filter.to_string(), "debug");

        let filter = filter_from_lookup(lookup(&[("RUST_LOG", "  "), (LOG_ENV_VAR, "error")]));
        assert_eq!(filter.to_string(), "error");
    }

    #[test]
    fn unparseable_values_fall_through_to_the_default() {
        let filter = filter_from_lookup(lookup(&[("RUST_LOG", "reconcile=loudest")]));
        assert_eq!(filter.to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
    }

    #[test]
    fn parses_log_formats() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Text ".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!(
            "yaml".parse::<LogFormat>().unwrap_err(),
            UnknownLogFormat("yaml".to_string())
        );
    }
}
