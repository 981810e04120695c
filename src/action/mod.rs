//! Actioner methods and their registry.
//!
//! An actioner reconciles the outside world with a target's confirmed health
//! state: kernel addresses and routes, the load balancer's backend table, or
//! an operator script. Like probe methods, actioners are prototypes:
//! `validate` checks a parameter map, `create` binds target and parameters to
//! an instance, and `act` applies one `Up`/`Down` signal within a timeout.
//!
//! `act` must be idempotent. Re-applying a signal the world already reflects
//! ("already exists" on add, "not found" on delete) succeeds with a warning.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::config::Params;
use crate::error::ActionTimeoutSnafu;
use crate::error::ConfigInvalidSnafu;
use crate::error::Result;
use crate::types::L3L4Addr;
use crate::types::Signal;

mod backend;
mod blank;
mod dpvs_addr;
mod kernel_route;
mod script;

pub use backend::BackendUpdateAction;
pub use blank::BlankAction;
pub use dpvs_addr::DpvsAddrAction;
pub use dpvs_addr::DpvsAddrKernelRouteAction;
pub use kernel_route::KernelRouteAction;
pub use script::ScriptAction;

/// Result type of data-plane client calls. The client lives outside this
/// crate; its errors are carried opaquely and folded into action errors.
pub type DataPlaneResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Narrow seam to the load-balancer data plane.
///
/// The real client (and its transport) is an external collaborator; actioners
/// only ever call through this trait.
#[async_trait]
pub trait DataPlaneClient: Send + Sync {
    /// Mark a virtual-server backend up or down.
    async fn update_backend(&self, backend: &L3L4Addr, signal: Signal) -> DataPlaneResult;

    /// Add a virtual address to a data-plane interface.
    async fn add_vip(&self, vip: std::net::IpAddr, ifname: &str) -> DataPlaneResult;

    /// Remove a virtual address from a data-plane interface.
    async fn del_vip(&self, vip: std::net::IpAddr, ifname: &str) -> DataPlaneResult;
}

/// External dependencies handed to actioner creation.
#[derive(Clone, Default)]
pub struct ActionDeps {
    /// Data-plane client, required by the backend and address actioners.
    pub data_plane: Option<Arc<dyn DataPlaneClient>>,
}

/// Actioner kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// No-op actioner.
    Blank,
    /// Update the backend's availability in the load-balancer table.
    BackendUpdate,
    /// Add or remove the target address (and optionally a host route) on a
    /// kernel interface.
    KernelRouteAddDel,
    /// Add or remove the target address on a data-plane interface.
    DpvsAddrAddDel,
    /// Composition of the kernel and data-plane address actioners.
    DpvsAddrKernelRouteAddDel,
    /// Invoke an operator script with the signal as final argument.
    Script,
}

impl ActionKind {
    /// Parse an actioner kind from its configuration name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Blank" => Some(ActionKind::Blank),
            "BackendUpdate" => Some(ActionKind::BackendUpdate),
            "KernelRouteAddDel" => Some(ActionKind::KernelRouteAddDel),
            "DpvsAddrAddDel" => Some(ActionKind::DpvsAddrAddDel),
            "DpvsAddrKernelRouteAddDel" => Some(ActionKind::DpvsAddrKernelRouteAddDel),
            "Script" => Some(ActionKind::Script),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Blank => "Blank",
            ActionKind::BackendUpdate => "BackendUpdate",
            ActionKind::KernelRouteAddDel => "KernelRouteAddDel",
            ActionKind::DpvsAddrAddDel => "DpvsAddrAddDel",
            ActionKind::DpvsAddrKernelRouteAddDel => "DpvsAddrKernelRouteAddDel",
            ActionKind::Script => "Script",
        };
        write!(f, "{name}")
    }
}

/// An actioner prototype and instance.
#[async_trait]
pub trait ActionMethod: Send + Sync {
    /// Statically check a parameter map for this kind.
    fn validate(&self, params: &Params) -> Result<()>;

    /// Bind target and validated parameters to a fresh instance.
    fn create(
        &self,
        target: &L3L4Addr,
        params: &Params,
        deps: &ActionDeps,
    ) -> Result<Box<dyn ActionMethod>>;

    /// Apply one reconciliation signal within `timeout`.
    async fn act(&self, signal: Signal, timeout: Duration) -> Result<()>;
}

/// Immutable kind-to-prototype table of actioners.
pub struct ActionRegistry {
    methods: HashMap<ActionKind, Box<dyn ActionMethod>>,
    deps: ActionDeps,
}

impl ActionRegistry {
    /// The built-in actioner table.
    pub fn builtin(deps: ActionDeps) -> Self {
        Self { methods: HashMap::new(), deps }
            .register(ActionKind::Blank, Box::new(BlankAction::default()))
            .register(ActionKind::BackendUpdate, Box::new(BackendUpdateAction::default()))
            .register(ActionKind::KernelRouteAddDel, Box::new(KernelRouteAction::default()))
            .register(ActionKind::DpvsAddrAddDel, Box::new(DpvsAddrAction::default()))
            .register(
                ActionKind::DpvsAddrKernelRouteAddDel,
                Box::new(DpvsAddrKernelRouteAction::default()),
            )
            .register(ActionKind::Script, Box::new(ScriptAction::default()))
    }

    /// Add or replace a prototype. Builder-style; the table is frozen once
    /// handed to the engine.
    pub fn register(mut self, kind: ActionKind, method: Box<dyn ActionMethod>) -> Self {
        self.methods.insert(kind, method);
        self
    }

    /// Validate parameters against a kind.
    pub fn validate(&self, kind: ActionKind, params: &Params) -> Result<()> {
        match self.methods.get(&kind) {
            Some(method) => method.validate(params),
            None => ConfigInvalidSnafu { message: format!("unsupported actioner kind {kind}") }
                .fail(),
        }
    }

    /// Create a bound actioner instance for a target.
    pub fn create(
        &self,
        kind: ActionKind,
        target: &L3L4Addr,
        params: &Params,
    ) -> Result<Box<dyn ActionMethod>> {
        match self.methods.get(&kind) {
            Some(method) => method.create(target, params, &self.deps),
            None => ConfigInvalidSnafu { message: format!("unsupported actioner kind {kind}") }
                .fail(),
        }
    }
}

/// Run a reconciliation future under the action timeout.
pub(crate) async fn bounded<F>(kind: ActionKind, timeout: Duration, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send,
{
    if timeout.is_zero() {
        return ConfigInvalidSnafu { message: format!("zero timeout on {kind} actioner") }.fail();
    }
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => ActionTimeoutSnafu { timeout_ms: timeout.as_millis() as u64 }.fail(),
    }
}

/// Ensure the bound target carries a usable IP.
pub(crate) fn require_target_ip(kind: ActionKind, target: &L3L4Addr) -> Result<()> {
    if target.ip.is_unspecified() {
        return ConfigInvalidSnafu { message: format!("no target address for {kind} actioner") }
            .fail();
    }
    Ok(())
}

/// Reject unrecognized and missing parameter keys for an actioner.
pub(crate) fn check_action_params(
    kind: ActionKind,
    params: &Params,
    required: &[&str],
    allowed: &[&str],
) -> Result<()> {
    let missing: Vec<&str> =
        required.iter().copied().filter(|key| !params.contains_key(*key)).collect();
    if !missing.is_empty() {
        return ConfigInvalidSnafu {
            message: format!("missing required {kind} action params: {}", missing.join(",")),
        }
        .fail();
    }
    let unsupported: Vec<&str> = params
        .keys()
        .map(String::as_str)
        .filter(|key| !allowed.contains(key))
        .collect();
    if !unsupported.is_empty() {
        return ConfigInvalidSnafu {
            message: format!("unsupported {kind} action params: {}", unsupported.join(",")),
        }
        .fail();
    }
    Ok(())
}
