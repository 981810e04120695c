//! Core value types shared across the engine.
//!
//! Targets are addressed by an [`L3L4Addr`], a plain value combining IP,
//! protocol and port. The engine keys its registry with [`TargetKey`], which
//! renders canonically as `IP` for virtual addresses and `IP-PROTO-PORT` for
//! virtual-server backends.

use std::fmt;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Health state of a target, either as a raw probe verdict or as the
/// debounced confirmed state.
///
/// `Unknown` only ever appears as a probe verdict (a probe that could not
/// decide); the confirmed state is always `Healthy` or `Unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum State {
    /// Target is reachable and behaving.
    #[default]
    Healthy,
    /// Target failed its probe.
    Unhealthy,
    /// The probe could not decide; no observation is recorded.
    Unknown,
}

impl State {
    /// The reconciliation signal corresponding to a confirmed state.
    pub fn signal(self) -> Signal {
        match self {
            State::Healthy => Signal::Up,
            _ => Signal::Down,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Healthy => write!(f, "healthy"),
            State::Unhealthy => write!(f, "unhealthy"),
            State::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reconciliation signal handed to actioners.
///
/// Renders as `UP` / `DOWN`; the script actioner passes the rendered form as
/// the final command-line argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Bring the target into service.
    Up,
    /// Take the target out of service.
    Down,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Up => write!(f, "UP"),
            Signal::Down => write!(f, "DOWN"),
        }
    }
}

/// Transport protocol of a probed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpProto {
    /// TCP endpoint.
    Tcp,
    /// UDP endpoint.
    Udp,
    /// ICMP (IPv4) target.
    Icmp,
    /// ICMPv6 target.
    Icmpv6,
}

impl IpProto {
    /// Parse the canonical protocol name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TCP" => Some(IpProto::Tcp),
            "UDP" => Some(IpProto::Udp),
            "ICMP" => Some(IpProto::Icmp),
            "ICMPv6" => Some(IpProto::Icmpv6),
            _ => None,
        }
    }
}

impl fmt::Display for IpProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProto::Tcp => write!(f, "TCP"),
            IpProto::Udp => write!(f, "UDP"),
            IpProto::Icmp => write!(f, "ICMP"),
            IpProto::Icmpv6 => write!(f, "ICMPv6"),
        }
    }
}

/// A layer-3/layer-4 endpoint: IP, protocol and port.
///
/// This is a plain value type; records store their own copy so no aliasing
/// can occur between the engine and its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct L3L4Addr {
    /// Endpoint address.
    pub ip: IpAddr,
    /// Endpoint port; 0 for port-less targets (ICMP).
    pub port: u16,
    /// Transport protocol.
    pub proto: IpProto,
}

impl L3L4Addr {
    /// Construct an endpoint value.
    pub fn new(ip: IpAddr, port: u16, proto: IpProto) -> Self {
        Self { ip, port, proto }
    }

    /// The `ip:port` form used by socket connect calls. IPv6 addresses are
    /// bracketed.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Parse the canonical `IP[-PROTO[-PORT]]` rendering.
    pub fn parse(s: &str) -> Option<Self> {
        let mut segs = s.splitn(3, '-');
        let ip: IpAddr = segs.next()?.parse().ok()?;
        let proto = match segs.next() {
            Some(p) => IpProto::parse(p)?,
            None => {
                if ip.is_ipv4() {
                    IpProto::Icmp
                } else {
                    IpProto::Icmpv6
                }
            }
        };
        let port = match segs.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        Some(Self { ip, port, proto })
    }
}

impl fmt::Display for L3L4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.ip, self.proto, self.port)
    }
}

/// Key of a target within the engine.
///
/// Virtual addresses are keyed by their bare IP; virtual-server backends by
/// the full `IP-PROTO-PORT` triple. Keys are unique within an engine and
/// ordered by their canonical rendering for stable read-outs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKey {
    /// A virtual address (VIP), probed at layer 3.
    Address(IpAddr),
    /// A virtual-server backend endpoint.
    Endpoint(L3L4Addr),
}

impl TargetKey {
    /// The probe-able endpoint behind this key. Virtual addresses resolve to
    /// an ICMP target on port 0.
    pub fn addr(&self) -> L3L4Addr {
        match *self {
            TargetKey::Address(ip) => {
                let proto = if ip.is_ipv4() {
                    IpProto::Icmp
                } else {
                    IpProto::Icmpv6
                };
                L3L4Addr::new(ip, 0, proto)
            }
            TargetKey::Endpoint(addr) => addr,
        }
    }

    /// Parse a key from its canonical rendering.
    pub fn parse(s: &str) -> Option<Self> {
        if s.contains('-') {
            L3L4Addr::parse(s).map(TargetKey::Endpoint)
        } else {
            s.parse().ok().map(TargetKey::Address)
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKey::Address(ip) => write!(f, "{ip}"),
            TargetKey::Endpoint(addr) => write!(f, "{addr}"),
        }
    }
}

impl FromStr for TargetKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetKey::parse(s).ok_or_else(|| format!("invalid target key: {s:?}"))
    }
}

impl PartialOrd for TargetKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TargetKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

/// Policy for composing a virtual address's health from its backends.
///
/// Evaluated by the control plane that owns VA composition; the engine only
/// stores and surfaces the configured policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DownPolicy {
    /// The VA is down if any backend is unhealthy.
    #[default]
    OneOf,
    /// The VA is down only if all backends are unhealthy.
    AllOf,
}

impl DownPolicy {
    /// Parse from its configuration spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "oneof" => Some(DownPolicy::OneOf),
            "allof" => Some(DownPolicy::AllOf),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l3l4_addr_renders_canonically() {
        let addr = L3L4Addr::new("10.0.0.1".parse().unwrap(), 80, IpProto::Tcp);
        assert_eq!(addr.to_string(), "10.0.0.1-TCP-80");

        let v6 = L3L4Addr::new("2001:db8::1".parse().unwrap(), 53, IpProto::Udp);
        assert_eq!(v6.to_string(), "2001:db8::1-UDP-53");
    }

    #[test]
    fn l3l4_addr_parse_round_trip() {
        for s in ["10.0.0.1-TCP-80", "192.0.2.7-UDP-53", "2001:db8::1-TCP-443"] {
            let addr = L3L4Addr::parse(s).unwrap();
            assert_eq!(addr.to_string(), s);
        }
    }

    #[test]
    fn l3l4_addr_parse_partial_forms() {
        let addr = L3L4Addr::parse("192.0.2.1").unwrap();
        assert_eq!(addr.proto, IpProto::Icmp);
        assert_eq!(addr.port, 0);

        let addr = L3L4Addr::parse("2001:db8::9").unwrap();
        assert_eq!(addr.proto, IpProto::Icmpv6);

        let addr = L3L4Addr::parse("192.0.2.1-UDP").unwrap();
        assert_eq!(addr.proto, IpProto::Udp);
        assert_eq!(addr.port, 0);
    }

    #[test]
    fn l3l4_addr_parse_rejects_garbage() {
        assert!(L3L4Addr::parse("").is_none());
        assert!(L3L4Addr::parse("not-an-ip").is_none());
        assert!(L3L4Addr::parse("10.0.0.1-SCTP-80").is_none());
        assert!(L3L4Addr::parse("10.0.0.1-TCP-99999").is_none());
    }

    #[test]
    fn socket_addr_brackets_ipv6() {
        let addr = L3L4Addr::new("2001:db8::1".parse().unwrap(), 80, IpProto::Tcp);
        assert_eq!(addr.socket_addr().to_string(), "[2001:db8::1]:80");
    }

    #[test]
    fn target_key_addresses_probe_as_icmp() {
        let key = TargetKey::parse("192.0.2.1").unwrap();
        assert!(matches!(key, TargetKey::Address(_)));
        let addr = key.addr();
        assert_eq!(addr.proto, IpProto::Icmp);
        assert_eq!(addr.port, 0);

        let key = TargetKey::parse("2001:db8::1").unwrap();
        assert_eq!(key.addr().proto, IpProto::Icmpv6);
    }

    #[test]
    fn target_keys_order_by_rendering() {
        let mut keys = vec![
            TargetKey::parse("10.0.0.2-TCP-80").unwrap(),
            TargetKey::parse("10.0.0.1").unwrap(),
            TargetKey::parse("10.0.0.1-UDP-53").unwrap(),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["10.0.0.1", "10.0.0.1-UDP-53", "10.0.0.2-TCP-80"]);
    }

    #[test]
    fn signal_renders_script_argument_form() {
        assert_eq!(Signal::Up.to_string(), "UP");
        assert_eq!(Signal::Down.to_string(), "DOWN");
        assert_eq!(State::Healthy.signal(), Signal::Up);
        assert_eq!(State::Unhealthy.signal(), Signal::Down);
    }

    #[test]
    fn down_policy_parse() {
        assert_eq!(DownPolicy::parse("oneOf"), Some(DownPolicy::OneOf));
        assert_eq!(DownPolicy::parse("ALLOF"), Some(DownPolicy::AllOf));
        assert_eq!(DownPolicy::parse("majority"), None);
    }
}
