//! Larch: health-checking control plane for a layer-4 load balancer.
//!
//! The crate continuously probes virtual addresses and the real backends
//! behind virtual servers, maintains a debounced health state per target, and
//! dispatches reconciliation against confirmed transitions: kernel addresses
//! and routes, the load balancer's backend table, or operator scripts.
//!
//! # Architecture
//!
//! - **probe**: pluggable probe methods (`none`/`tcp`/`udp`/`ping`/`udpping`/
//!   `http`) behind an immutable registry.
//! - **action**: pluggable actioners behind an immutable registry, with a
//!   narrow trait seam to the external data-plane client.
//! - **engine**: the target map plus, per target, a periodic checker loop
//!   feeding a pure hysteresis state machine and a dispatcher serializing
//!   actions against confirmed transitions.
//!
//! Configuration parsing, target discovery, and the data-plane transport are
//! external collaborators; the engine consumes validated configuration and
//! exposes state read-outs.
//!
//! ```no_run
//! use larch::action::{ActionDeps, ActionRegistry};
//! use larch::probe::ProbeRegistry;
//! use larch::{CheckerConfig, ActionConfig, Engine, TargetKey};
//!
//! # async fn demo() -> larch::Result<()> {
//! let engine = Engine::new(
//!     ProbeRegistry::builtin(),
//!     ActionRegistry::builtin(ActionDeps::default()),
//! );
//! let key: TargetKey = "10.0.0.1-TCP-80".parse().unwrap();
//! engine.add_target(key, CheckerConfig::default(), ActionConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Actioner methods, their registry, and the data-plane client seam.
pub mod action;
/// Probe and actioner configuration structures.
pub mod config;
/// The target registry, checker loops and action dispatchers.
pub mod engine;
/// Error types.
pub mod error;
/// Probe methods and their registry.
pub mod probe;
/// Core value types: states, signals, addresses and keys.
pub mod types;

pub use config::ActionConfig;
pub use config::CheckerConfig;
pub use config::Params;
pub use config::ZERO_RETRY;
pub use engine::Engine;
pub use engine::EngineStats;
pub use engine::TargetReadout;
pub use error::Error;
pub use error::Result;
pub use types::DownPolicy;
pub use types::IpProto;
pub use types::L3L4Addr;
pub use types::Signal;
pub use types::State;
pub use types::TargetKey;
