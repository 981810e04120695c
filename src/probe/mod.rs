//! Probe methods and their registry.
//!
//! A probe method is a prototype: `validate` statically checks a parameter
//! map, `create` binds validated parameters to a fresh instance, and `check`
//! executes one bounded probe against a target. The registry is an immutable
//! kind-to-prototype table built once at startup and handed to the engine;
//! nothing mutates it afterwards.
//!
//! `check` must return on or before its timeout and must not leak sockets.
//! Network-level failures are verdicts, not errors: they map to
//! [`State::Unhealthy`]. An `Err` return is reserved for programmer error
//! such as a zero timeout.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::config::Params;
use crate::error::ConfigInvalidSnafu;
use crate::error::Result;
use crate::types::IpProto;
use crate::types::L3L4Addr;
use crate::types::State;

mod http;
mod none;
mod ping;
mod tcp;
mod udp;
mod udpping;

pub use http::HttpChecker;
pub use none::NoneChecker;
pub use ping::PingChecker;
pub use tcp::TcpChecker;
pub use udp::UdpChecker;
pub use udpping::UdpPingChecker;

/// Parameter key selecting a PROXY protocol preamble.
pub const PARAM_PROXY_PROTO: &str = "proxy-protocol";

/// PROXY protocol v1 preamble for a connection with no tunneled client.
pub const PROXY_PROTO_V1_LOCAL: &str = "PROXY UNKNOWN\r\n";

/// PROXY protocol v2 LOCAL command preamble.
pub const PROXY_PROTO_V2_LOCAL: [u8; 16] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A, 0x20, 0x00, 0x00, 0x00,
];

/// Probe method kinds with their reserved wire identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ProbeKind {
    /// Always-healthy probe.
    None = 1,
    /// TCP connect with optional payload exchange.
    Tcp = 2,
    /// UDP datagram exchange.
    Udp = 3,
    /// ICMP echo.
    Ping = 4,
    /// Composite ping-then-UDP probe.
    UdpPing = 5,
    /// HTTP(S) request probe.
    Http = 6,
    /// Resolved from the target protocol at creation time.
    Auto = 10_000,
    /// Externally-reported health; never dispatched by the engine.
    Passive = 65_535,
}

impl ProbeKind {
    /// The reserved numeric identifier of this kind.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Look up a kind by its numeric identifier.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(ProbeKind::None),
            2 => Some(ProbeKind::Tcp),
            3 => Some(ProbeKind::Udp),
            4 => Some(ProbeKind::Ping),
            5 => Some(ProbeKind::UdpPing),
            6 => Some(ProbeKind::Http),
            10_000 => Some(ProbeKind::Auto),
            65_535 => Some(ProbeKind::Passive),
            _ => None,
        }
    }

    /// Parse a kind from its configuration name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "none" => Some(ProbeKind::None),
            "tcp" => Some(ProbeKind::Tcp),
            "udp" => Some(ProbeKind::Udp),
            "ping" => Some(ProbeKind::Ping),
            "udpping" => Some(ProbeKind::UdpPing),
            "http" => Some(ProbeKind::Http),
            "auto" => Some(ProbeKind::Auto),
            "passive" => Some(ProbeKind::Passive),
            _ => None,
        }
    }

    /// Resolve `auto` against a target protocol. Other kinds resolve to
    /// themselves.
    pub fn resolve(self, proto: IpProto) -> Self {
        if self != ProbeKind::Auto {
            return self;
        }
        match proto {
            IpProto::Tcp => ProbeKind::Tcp,
            IpProto::Udp => ProbeKind::UdpPing,
            IpProto::Icmp | IpProto::Icmpv6 => ProbeKind::Ping,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeKind::None => "none",
            ProbeKind::Tcp => "tcp",
            ProbeKind::Udp => "udp",
            ProbeKind::Ping => "ping",
            ProbeKind::UdpPing => "udpping",
            ProbeKind::Http => "http",
            ProbeKind::Auto => "auto",
            ProbeKind::Passive => "passive",
        };
        write!(f, "{name}")
    }
}

/// A probe method prototype and instance.
///
/// Registry entries are prototypes; `create` produces the bound instance the
/// checker loop actually drives.
#[async_trait]
pub trait CheckMethod: Send + Sync {
    /// Statically check a parameter map for this method.
    fn validate(&self, params: &Params) -> Result<()>;

    /// Bind validated parameters to a fresh instance.
    fn create(&self, params: &Params) -> Result<Box<dyn CheckMethod>>;

    /// Execute one probe. Must return on or before `timeout`.
    async fn check(&self, target: &L3L4Addr, timeout: Duration) -> Result<State>;
}

/// Immutable name-to-prototype table of probe methods.
pub struct ProbeRegistry {
    methods: HashMap<ProbeKind, Box<dyn CheckMethod>>,
}

impl ProbeRegistry {
    /// The built-in method table.
    pub fn builtin() -> Self {
        Self { methods: HashMap::new() }
            .register(ProbeKind::None, Box::new(NoneChecker::default()))
            .register(ProbeKind::Tcp, Box::new(TcpChecker::default()))
            .register(ProbeKind::Udp, Box::new(UdpChecker::default()))
            .register(ProbeKind::Ping, Box::new(PingChecker::default()))
            .register(ProbeKind::UdpPing, Box::new(UdpPingChecker::default()))
            .register(ProbeKind::Http, Box::new(HttpChecker::default()))
    }

    /// Add or replace a prototype. Builder-style; the table is frozen once
    /// handed to the engine.
    pub fn register(mut self, kind: ProbeKind, method: Box<dyn CheckMethod>) -> Self {
        self.methods.insert(kind, method);
        self
    }

    /// Validate parameters against a kind. `auto` always validates: it is
    /// resolved with default parameters at target creation.
    pub fn validate(&self, kind: ProbeKind, params: &Params) -> Result<()> {
        if kind == ProbeKind::Auto {
            return Ok(());
        }
        match self.methods.get(&kind) {
            Some(method) => method.validate(params),
            None => ConfigInvalidSnafu { message: format!("unsupported checker kind {kind}") }
                .fail(),
        }
    }

    /// Create a bound probe instance. The caller resolves `auto` first.
    pub fn create(&self, kind: ProbeKind, params: &Params) -> Result<Box<dyn CheckMethod>> {
        match self.methods.get(&kind) {
            Some(method) => method.create(params),
            None => ConfigInvalidSnafu { message: format!("unsupported checker kind {kind}") }
                .fail(),
        }
    }

    /// Registered kinds plus the reserved logical ones, as `id-name` strings
    /// sorted by identifier. Diagnostic output.
    pub fn dump(&self) -> Vec<String> {
        let mut ids: Vec<u16> = self.methods.keys().map(|k| k.id()).collect();
        ids.push(ProbeKind::Auto.id());
        ids.push(ProbeKind::Passive.id());
        ids.sort_unstable();
        ids.into_iter()
            .map(|id| {
                let kind = ProbeKind::from_id(id).expect("registered kind has a known id");
                format!("{id}-{kind}")
            })
            .collect()
    }
}

/// Reject unrecognized parameter keys against a per-method allowlist.
pub(crate) fn reject_unknown_params(method: &str, params: &Params, allowed: &[&str]) -> Result<()> {
    let unsupported: Vec<&str> = params
        .keys()
        .map(String::as_str)
        .filter(|key| !allowed.contains(key))
        .collect();
    if !unsupported.is_empty() {
        return ConfigInvalidSnafu {
            message: format!("unsupported {method} checker params: {}", unsupported.join(",")),
        }
        .fail();
    }
    Ok(())
}
