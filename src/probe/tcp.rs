//! TCP probe: connect, optionally exchange a payload, compare the reply.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
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
use crate::probe::PROXY_PROTO_V1_LOCAL;
use crate::probe::PROXY_PROTO_V2_LOCAL;
use crate::types::L3L4Addr;
use crate::types::State;

/// TCP connect probe with optional PROXY preamble and payload exchange.
///
/// Any network-level failure, including running out of budget mid-exchange,
/// yields an `Unhealthy` verdict.
#[derive(Debug, Default, Clone)]
pub struct TcpChecker {
    send: String,
    receive: String,
    proxy_proto: String,
}

impl TcpChecker {
    async fn exchange(&self, target: &L3L4Addr) -> std::io::Result<State> {
        let mut stream = TcpStream::connect(target.socket_addr()).await?;

        match self.proxy_proto.as_str() {
            "v1" => stream.write_all(PROXY_PROTO_V1_LOCAL.as_bytes()).await?,
            "v2" => stream.write_all(&PROXY_PROTO_V2_LOCAL).await?,
            _ => {}
        }

        if !self.send.is_empty() {
            stream.write_all(self.send.as_bytes()).await?;
        }

        if !self.receive.is_empty() {
            let mut buf = vec![0u8; self.receive.len()];
            stream.read_exact(&mut buf).await?;
            if buf != self.receive.as_bytes() {
                trace!(target = %target, "tcp check: unexpected response");
                return Ok(State::Unhealthy);
            }
        }

        Ok(State::Healthy)
    }
}

#[async_trait]
impl CheckMethod for TcpChecker {
    fn validate(&self, params: &Params) -> Result<()> {
        reject_unknown_params("tcp", params, &["send", "receive", PARAM_PROXY_PROTO])?;
        for key in ["send", "receive"] {
            if let Some(val) = params.get(key) {
                if val.is_empty() {
                    return ConfigInvalidSnafu { message: format!("empty tcp checker param: {key}") }
                        .fail();
                }
            }
        }
        if let Some(val) = params.get(PARAM_PROXY_PROTO) {
            let val = val.to_lowercase();
            if val != "v1" && val != "v2" {
                return ConfigInvalidSnafu {
                    message: format!("invalid tcp checker param value: {PARAM_PROXY_PROTO}:{val}"),
                }
                .fail();
            }
        }
        Ok(())
    }

    fn create(&self, params: &Params) -> Result<Box<dyn CheckMethod>> {
        self.validate(params)?;
        Ok(Box::new(TcpChecker {
            send: params.get("send").cloned().unwrap_or_default(),
            receive: params.get("receive").cloned().unwrap_or_default(),
            proxy_proto: params
                .get(PARAM_PROXY_PROTO)
                .map(|v| v.to_lowercase())
                .unwrap_or_default(),
        }))
    }

    async fn check(&self, target: &L3L4Addr, timeout: Duration) -> Result<State> {
        if timeout.is_zero() {
            return ProbeProgrammerSnafu { message: "zero timeout on tcp check" }.fail();
        }

        let deadline = Instant::now() + timeout;
        trace!(target = %target, "starting tcp check");

        match timeout_at(deadline, self.exchange(target)).await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(err)) => {
                trace!(target = %target, error = %err, "tcp check failed");
                Ok(State::Unhealthy)
            }
            Err(_) => {
                trace!(target = %target, "tcp check timed out");
                Ok(State::Unhealthy)
            }
        }
    }
}
