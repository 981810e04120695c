//! Composite ping-then-UDP probe.
//!
//! The UDP probe alone cannot distinguish a dead host from a silent service.
//! Running an ICMP echo first resolves most of that ambiguity: an unreachable
//! host fails fast without a UDP socket ever being opened, and only reachable
//! hosts proceed to the datagram exchange with whatever budget remains.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use crate::config::Params;
use crate::error::ProbeProgrammerSnafu;
use crate::error::Result;
use crate::probe::CheckMethod;
use crate::probe::PingChecker;
use crate::probe::UdpChecker;
use crate::types::L3L4Addr;
use crate::types::State;

/// Ping probe composed in front of a UDP probe.
#[derive(Debug, Default)]
pub struct UdpPingChecker {
    ping: PingChecker,
    udp: UdpChecker,
}

#[async_trait]
impl CheckMethod for UdpPingChecker {
    fn validate(&self, params: &Params) -> Result<()> {
        // The ping leg takes no parameters; everything belongs to the UDP leg.
        self.udp.validate(params)
    }

    fn create(&self, params: &Params) -> Result<Box<dyn CheckMethod>> {
        let udp = UdpChecker::from_params(params)?;
        Ok(Box::new(UdpPingChecker { ping: PingChecker, udp }))
    }

    async fn check(&self, target: &L3L4Addr, timeout: Duration) -> Result<State> {
        if timeout.is_zero() {
            return ProbeProgrammerSnafu { message: "zero timeout on udpping check" }.fail();
        }

        let start = Instant::now();
        trace!(target = %target, "starting udpping check");

        let state = self.ping.check(target, timeout).await?;
        if state == State::Unhealthy {
            trace!(target = %target, "udpping check: ping leg failed");
            return Ok(State::Unhealthy);
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        self.udp.check(target, remaining).await
    }
}
