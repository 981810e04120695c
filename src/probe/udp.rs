//! UDP probe: datagram exchange with deliberate timeout semantics.
//!
//! UDP gives no connection signal, so a probe with nothing to send and
//! nothing to expect is inherently ambiguous: a read timeout can mean either
//! a black hole or a perfectly healthy silent service. Returning `Unknown`
//! there would starve the state machine of observations and let the confirmed
//! state oscillate on unrelated noise, so that specific case maps to
//! `Healthy`. An ICMP port-unreachable still surfaces as a read error and
//! yields `Unhealthy`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::trace;

use crate::config::Params;
use crate::error::ConfigInvalidSnafu;
use crate::error::ProbeProgrammerSnafu;
use crate::error::Result;
use crate::probe::reject_unknown_params;
use crate::probe::CheckMethod;
use crate::probe::PARAM_PROXY_PROTO;
use crate::probe::PROXY_PROTO_V2_LOCAL;
use crate::types::L3L4Addr;
use crate::types::State;

/// UDP datagram probe with optional PROXY v2 preamble.
#[derive(Debug, Default, Clone)]
pub struct UdpChecker {
    send: String,
    receive: String,
    proxy_proto: String,
}

enum Exchange {
    Verdict(State),
    ReadTimedOut,
}

impl UdpChecker {
    /// Bind validated parameters to a concrete checker. Shared with the
    /// composite udpping probe, which embeds this type directly.
    pub(crate) fn from_params(params: &Params) -> Result<Self> {
        UdpChecker::default().validate(params)?;
        Ok(UdpChecker {
            send: params.get("send").cloned().unwrap_or_default(),
            receive: params.get("receive").cloned().unwrap_or_default(),
            proxy_proto: params
                .get(PARAM_PROXY_PROTO)
                .map(|v| v.to_lowercase())
                .unwrap_or_default(),
        })
    }

    async fn exchange(&self, target: &L3L4Addr, deadline: Instant) -> std::io::Result<Exchange> {
        let bind_addr = if target.ip.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(target.socket_addr()).await?;

        if self.proxy_proto == "v2" {
            socket.send(&PROXY_PROTO_V2_LOCAL).await?;
        }

        // A zero-length datagram still elicits ICMP errors from dead ports.
        socket.send(self.send.as_bytes()).await?;

        let mut buf = vec![0u8; self.receive.len()];
        let received = match timeout_at(deadline, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => return Err(err),
            Err(_) => return Ok(Exchange::ReadTimedOut),
        };

        if buf[..received] != *self.receive.as_bytes() {
            return Ok(Exchange::Verdict(State::Unhealthy));
        }
        Ok(Exchange::Verdict(State::Healthy))
    }
}

#[async_trait]
impl CheckMethod for UdpChecker {
    fn validate(&self, params: &Params) -> Result<()> {
        reject_unknown_params("udp", params, &["send", "receive", PARAM_PROXY_PROTO])?;
        for key in ["send", "receive"] {
            if let Some(val) = params.get(key) {
                if val.is_empty() {
                    return ConfigInvalidSnafu { message: format!("empty udp checker param: {key}") }
                        .fail();
                }
            }
        }
        if let Some(val) = params.get(PARAM_PROXY_PROTO) {
            if val.to_lowercase() != "v2" {
                return ConfigInvalidSnafu {
                    message: format!("invalid udp checker param value: {PARAM_PROXY_PROTO}:{val}"),
                }
                .fail();
            }
        }
        Ok(())
    }

    fn create(&self, params: &Params) -> Result<Box<dyn CheckMethod>> {
        Ok(Box::new(UdpChecker::from_params(params)?))
    }

    async fn check(&self, target: &L3L4Addr, timeout: Duration) -> Result<State> {
        if timeout.is_zero() {
            return ProbeProgrammerSnafu { message: "zero timeout on udp check" }.fail();
        }

        let deadline = Instant::now() + timeout;
        trace!(target = %target, "starting udp check");

        match timeout_at(deadline, self.exchange(target, deadline)).await {
            Ok(Ok(Exchange::Verdict(state))) => Ok(state),
            Ok(Ok(Exchange::ReadTimedOut)) => {
                if self.send.is_empty() && self.receive.is_empty() {
                    // Ambiguous silence; see the module docs.
                    trace!(target = %target, "udp check: i/o timeout treated as healthy");
                    Ok(State::Healthy)
                } else {
                    Ok(State::Unhealthy)
                }
            }
            Ok(Err(err)) => {
                trace!(target = %target, error = %err, "udp check failed");
                Ok(State::Unhealthy)
            }
            Err(_) => Ok(State::Unhealthy),
        }
    }
}
