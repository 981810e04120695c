//! Error types for the health-checking engine.
//!
//! Network-level probe failures are not errors: probes fold them into an
//! `Unhealthy` verdict and the state machine absorbs them. The variants here
//! cover static validation, lifecycle misuse, and actioner failures, which do
//! surface to callers or logs.

use snafu::Snafu;

/// Errors surfaced by the engine, registries, probes and actioners.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A probe or actioner configuration failed static validation.
    #[snafu(display("invalid configuration: {message}"))]
    ConfigInvalid {
        /// What was rejected and why.
        message: String,
    },

    /// The requested target key is not registered.
    #[snafu(display("target {key} not found"))]
    TargetNotFound {
        /// Canonical rendering of the missing key.
        key: String,
    },

    /// A probe was invoked in a way that can never produce a verdict, such
    /// as a zero timeout.
    #[snafu(display("probe misuse: {message}"))]
    ProbeProgrammer {
        /// Description of the misuse.
        message: String,
    },

    /// An actioner did not complete within its configured timeout.
    #[snafu(display("action timed out after {timeout_ms}ms"))]
    ActionTimeout {
        /// The configured timeout, in milliseconds.
        timeout_ms: u64,
    },

    /// An actioner failed while reconciling external state.
    #[snafu(display("action failed: {message}"))]
    ActionTransport {
        /// Description of the failure.
        message: String,
    },

    /// The engine has begun shutting down and accepts no lifecycle calls.
    #[snafu(display("engine is shutting down"))]
    EngineShuttingDown,
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
