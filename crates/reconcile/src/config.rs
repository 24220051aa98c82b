//! Timeout configuration.
//!
//! Two layers feed the timeout resolver:
//!
//! - [`TimeoutConfig`]: provider-wide default durations per operation, plus
//!   named per-resource-type overrides. Read once at the boundary from a raw
//!   JSON form whose durations are strings, and validated into [`Duration`]s.
//! - [`OperationTimeouts`]: the per-instance strings a user wrote on one
//!   resource. These are parsed lazily at operation time, because a bad value
//!   must surface as a diagnostic on that operation rather than as a load error.
//!
//! Duration strings are a sequence of `<number><unit>` pairs with units `ms`,
//! `s`, `m` and `h`, e.g. `"90s"`, `"2m30s"`, `"1.5h"` or `"500ms"`. A bare
//! `"0"` is accepted as zero. Anything longer than [`MAX_DURATION`] is
//! rejected as out of range.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::backoff::DEFAULT_OPERATION_TIMEOUT;
use crate::{Diagnostic, Diagnostics, OperationKind, ResourceType};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration could not be loaded or validated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("resource type names in timeout overrides must not be empty")]
    EmptyResourceType,

    #[error("timeout configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn invalid(input: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidDuration {
        input: input.to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Duration parsing
// ---------------------------------------------------------------------------

const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Longest duration [`parse_duration`] accepts: 100 years.
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 3_600);

fn unit_nanos(unit: &str) -> Option<u64> {
    match unit {
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3_600 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Parses a duration string such as `"2m30s"`.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid(input, "empty duration"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid(input, "expected a number"));
        }
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        if unit.is_empty() {
            return Err(invalid(input, format!("missing unit after {number:?}")));
        }
        let Some(scale) = unit_nanos(unit) else {
            return Err(invalid(input, format!("unknown unit {unit:?}")));
        };

        let part = if number.contains('.') {
            let value: f64 = number
                .parse()
                .map_err(|_| invalid(input, format!("malformed number {number:?}")))?;
            Duration::try_from_secs_f64(value * scale as f64 / NANOS_PER_SEC as f64)
                .map_err(|_| invalid(input, "out of range"))?
        } else {
            let value: u64 = number
                .parse()
                .map_err(|_| invalid(input, format!("malformed number {number:?}")))?;
            let nanos = value
                .checked_mul(scale)
                .ok_or_else(|| invalid(input, "out of range"))?;
            Duration::from_nanos(nanos)
        };

        total = total
            .checked_add(part)
            .filter(|total| *total <= MAX_DURATION)
            .ok_or_else(|| invalid(input, "out of range"))?;
        rest = tail;
    }

    Ok(total)
}

// ---------------------------------------------------------------------------
// Per-instance overrides
// ---------------------------------------------------------------------------

/// A user-authored timeout for one operation on one resource instance.
///
/// Absent (or blank) means "use the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct TimeoutOverride(Option<String>);

impl TimeoutOverride {
    pub fn unset() -> Self {
        Self(None)
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(Some(value.into()))
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// The timeout computation handed to [`crate::resolve_timeout`].
    ///
    /// Returns `default` when unset, the parsed value when it parses, and an
    /// error diagnostic otherwise.
    pub fn resolve(&self, default: Duration) -> (Duration, Diagnostics) {
        let raw = match self.0.as_deref().map(str::trim) {
            None | Some("") => return (default, Diagnostics::new()),
            Some(raw) => raw,
        };

        match parse_duration(raw) {
            Ok(timeout) => (timeout, Diagnostics::new()),
            Err(err) => (
                default,
                Diagnostics::from(Diagnostic::error(
                    "Invalid timeout value",
                    format!("Could not parse the configured timeout: {err}"),
                )),
            ),
        }
    }
}

/// Per-instance timeout overrides for the four operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationTimeouts {
    pub create: TimeoutOverride,
    pub read: TimeoutOverride,
    pub update: TimeoutOverride,
    pub delete: TimeoutOverride,
}

impl OperationTimeouts {
    pub fn get(&self, operation: OperationKind) -> &TimeoutOverride {
        match operation {
            OperationKind::Create => &self.create,
            OperationKind::Read => &self.read,
            OperationKind::Update => &self.update,
            OperationKind::Delete => &self.delete,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider-wide defaults
// ---------------------------------------------------------------------------

/// Default timeout for each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutDefaults {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for TimeoutDefaults {
    fn default() -> Self {
        Self {
            create: DEFAULT_OPERATION_TIMEOUT,
            read: DEFAULT_OPERATION_TIMEOUT,
            update: DEFAULT_OPERATION_TIMEOUT,
            delete: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl TimeoutDefaults {
    pub fn get(&self, operation: OperationKind) -> Duration {
        match operation {
            OperationKind::Create => self.create,
            OperationKind::Read => self.read,
            OperationKind::Update => self.update,
            OperationKind::Delete => self.delete,
        }
    }
}

/// Overrides for a single resource type. Unset entries use [`TimeoutDefaults`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceTimeouts {
    pub create: Option<Duration>,
    pub read: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
}

impl ResourceTimeouts {
    pub fn get(&self, operation: OperationKind) -> Option<Duration> {
        match operation {
            OperationKind::Create => self.create,
            OperationKind::Read => self.read,
            OperationKind::Update => self.update,
            OperationKind::Delete => self.delete,
        }
    }
}

/// Provider-wide timeout configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTimeoutConfig")]
pub struct TimeoutConfig {
    defaults: TimeoutDefaults,
    resources: BTreeMap<ResourceType, ResourceTimeouts>,
}

impl TimeoutConfig {
    pub fn new(defaults: TimeoutDefaults) -> Self {
        Self {
            defaults,
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, resource_type: ResourceType, timeouts: ResourceTimeouts) -> Self {
        self.resources.insert(resource_type, timeouts);
        self
    }

    /// Loads and validates configuration from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawTimeoutConfig = serde_json::from_str(json)?;
        Self::try_from(raw)
    }

    pub fn defaults(&self) -> &TimeoutDefaults {
        &self.defaults
    }

    /// The default timeout for `operation` on `resource_type`: the type's own
    /// override when set, the provider-wide default otherwise.
    pub fn timeout_for(&self, resource_type: &ResourceType, operation: OperationKind) -> Duration {
        self.resources
            .get(resource_type)
            .and_then(|timeouts| timeouts.get(operation))
            .unwrap_or_else(|| self.defaults.get(operation))
    }
}

// ---------------------------------------------------------------------------
// Raw (wire) form
// ---------------------------------------------------------------------------

/// Unvalidated configuration as it appears in JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawTimeoutConfig {
    pub defaults: RawTimeouts,
    pub resources: BTreeMap<String, RawTimeouts>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawTimeouts {
    pub create: Option<String>,
    pub read: Option<String>,
    pub update: Option<String>,
    pub delete: Option<String>,
}

impl RawTimeouts {
    fn parse(&self) -> Result<ResourceTimeouts, ConfigError> {
        let field = |value: &Option<String>| value.as_deref().map(parse_duration).transpose();
        Ok(ResourceTimeouts {
            create: field(&self.create)?,
            read: field(&self.read)?,
            update: field(&self.update)?,
            delete: field(&self.delete)?,
        })
    }
}

impl TryFrom<RawTimeoutConfig> for TimeoutConfig {
    type Error = ConfigError;

    fn try_from(raw: RawTimeoutConfig) -> Result<Self, Self::Error> {
        let parsed = raw.defaults.parse()?;
        let fallback = TimeoutDefaults::default();
        let defaults = TimeoutDefaults {
            create: parsed.create.unwrap_or(fallback.create),
            read: parsed.read.unwrap_or(fallback.read),
            update: parsed.update.unwrap_or(fallback.update),
            delete: parsed.delete.unwrap_or(fallback.delete),
        };

        let mut resources = BTreeMap::new();
        for (name, timeouts) in &raw.resources {
            let resource_type = ResourceType::new(name.as_str()).ok_or(ConfigError::EmptyResourceType)?;
            resources.insert(resource_type, timeouts.parse()?);
        }

        Ok(Self { defaults, resources })
    }
}
