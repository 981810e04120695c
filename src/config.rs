//! Per-target probe and actioner configuration.
//!
//! The engine consumes already-parsed configuration; file loading and the
//! control plane that produces these structures live outside this crate.
//! Validation here covers the scalar fields; method parameter maps are
//! validated by the registries against the selected kind.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::action::ActionKind;
use crate::error::ConfigInvalidSnafu;
use crate::error::Error;
use crate::error::Result;
use crate::probe::ProbeKind;
use crate::types::State;

/// Flat string-to-string method parameter map.
///
/// Recognized keys are method-specific; unrecognized keys fail validation.
pub type Params = BTreeMap<String, String>;

/// Sentinel retry value meaning "zero retry": a single opposing verdict
/// suffices to flip the confirmed state.
pub const ZERO_RETRY: u32 = 999_999;

/// Configuration of a target's periodic probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Probe method kind; `auto` resolves from the target protocol.
    pub kind: ProbeKind,
    /// Interval between probe starts.
    pub interval: Duration,
    /// Budget for a single probe; a probe must return on or before it.
    pub timeout: Duration,
    /// Consecutive healthy verdicts required to confirm recovery.
    /// [`ZERO_RETRY`] means one verdict suffices.
    pub up_retry: u32,
    /// Consecutive unhealthy verdicts required to confirm failure.
    /// [`ZERO_RETRY`] means one verdict suffices.
    pub down_retry: u32,
    /// Confirmed state assigned at target creation.
    pub initial_state: State,
    /// Method-specific parameters.
    pub params: Params,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::Auto,
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(1),
            up_retry: 1,
            down_retry: 1,
            initial_state: State::Healthy,
            params: Params::new(),
        }
    }
}

impl CheckerConfig {
    /// Validate the scalar fields.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return ConfigInvalidSnafu { message: "checker interval must be non-zero" }.fail();
        }
        if self.timeout.is_zero() {
            return ConfigInvalidSnafu { message: "checker timeout must be non-zero" }.fail();
        }
        if self.up_retry == 0 || self.down_retry == 0 {
            return ConfigInvalidSnafu {
                message: format!("retry counts must be at least 1 (or {ZERO_RETRY} for zero retry)"),
            }
            .fail();
        }
        if self.initial_state == State::Unknown {
            return ConfigInvalidSnafu { message: "initial state must be healthy or unhealthy" }
                .fail();
        }
        Ok(())
    }
}

/// Configuration of a target's actioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Actioner kind.
    pub kind: ActionKind,
    /// Budget for a single reconciliation.
    pub timeout: Duration,
    /// Minimum interval between two actions carrying the same signal.
    pub sync_interval: Duration,
    /// Kind-specific parameters.
    pub params: Params,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            kind: ActionKind::Blank,
            timeout: Duration::from_secs(2),
            sync_interval: Duration::from_secs(15),
            params: Params::new(),
        }
    }
}

impl ActionConfig {
    /// Validate the scalar fields.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return ConfigInvalidSnafu { message: "action timeout must be non-zero" }.fail();
        }
        Ok(())
    }
}

/// Parse a boolean parameter value. Accepts `true`/`false`, `yes`/`no` and
/// `1`/`0`, case-insensitively; the empty string is false.
pub(crate) fn parse_bool(val: &str) -> Result<bool, Error> {
    match val.to_lowercase().as_str() {
        "" | "false" | "no" | "0" => Ok(false),
        "true" | "yes" | "1" => Ok(true),
        _ => ConfigInvalidSnafu { message: format!("invalid boolean value {val:?}") }.fail(),
    }
}
