//! ICMP echo probe.
//!
//! A single lost echo should not fail a target, so the probe retries inside
//! its timeout window: the remaining budget is split evenly across the
//! remaining attempts and the first reply wins. Raw ICMP sockets require
//! elevated privileges; a socket that cannot be opened is reported as an
//! unhealthy verdict, not an error.

use std::time::Duration;

use async_trait::async_trait;
use surge_ping::Client;
use surge_ping::Config;
use surge_ping::PingIdentifier;
use surge_ping::PingSequence;
use surge_ping::ICMP;
use tokio::time::Instant;
use tracing::trace;

use crate::config::Params;
use crate::error::ProbeProgrammerSnafu;
use crate::error::Result;
use crate::probe::reject_unknown_params;
use crate::probe::CheckMethod;
use crate::types::L3L4Addr;
use crate::types::State;

const ECHO_ATTEMPTS: u32 = 3;
const ECHO_PAYLOAD: [u8; 56] = [0u8; 56];

/// ICMP echo probe with in-budget retries.
#[derive(Debug, Default, Clone)]
pub struct PingChecker;

#[async_trait]
impl CheckMethod for PingChecker {
    fn validate(&self, params: &Params) -> Result<()> {
        reject_unknown_params("ping", params, &[])
    }

    fn create(&self, params: &Params) -> Result<Box<dyn CheckMethod>> {
        self.validate(params)?;
        Ok(Box::new(PingChecker))
    }

    async fn check(&self, target: &L3L4Addr, timeout: Duration) -> Result<State> {
        if timeout.is_zero() {
            return ProbeProgrammerSnafu { message: "zero timeout on ping check" }.fail();
        }

        let deadline = Instant::now() + timeout;
        trace!(target = %target, "starting ping check");

        let config = if target.ip.is_ipv4() {
            Config::default()
        } else {
            Config::builder().kind(ICMP::V6).build()
        };
        let client = match Client::new(&config) {
            Ok(client) => client,
            Err(err) => {
                trace!(target = %target, error = %err, "ping check: cannot open icmp socket");
                return Ok(State::Unhealthy);
            }
        };

        let mut pinger = client.pinger(target.ip, PingIdentifier(rand::random())).await;
        for attempt in 0..ECHO_ATTEMPTS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            pinger.timeout(remaining / (ECHO_ATTEMPTS - attempt));

            match pinger.ping(PingSequence(attempt as u16), &ECHO_PAYLOAD).await {
                Ok((_, rtt)) => {
                    trace!(target = %target, rtt_ms = rtt.as_millis() as u64, "ping check succeeded");
                    return Ok(State::Healthy);
                }
                Err(err) => {
                    trace!(target = %target, attempt, error = %err, "ping attempt failed");
                }
            }
        }

        Ok(State::Unhealthy)
    }
}
