//! Data-plane address actioner and its kernel composite.
//!
//! `DpvsAddrAddDel` adds or removes the target address on a data-plane
//! interface through the external client. `DpvsAddrKernelRouteAddDel` couples
//! that with the kernel actioner so the host and the data plane stay in step:
//! bringing a VIP up configures the kernel first so the data plane never
//! advertises an address the host cannot answer for, and taking it down
//! withdraws it from the data plane first for the same reason. Partial
//! failure is an error; the next transition event re-drives the pair.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::action::bounded;
use crate::action::check_action_params;
use crate::action::require_target_ip;
use crate::action::ActionDeps;
use crate::action::ActionKind;
use crate::action::ActionMethod;
use crate::action::DataPlaneClient;
use crate::action::KernelRouteAction;
use crate::config::Params;
use crate::error::ActionTimeoutSnafu;
use crate::error::ActionTransportSnafu;
use crate::error::ConfigInvalidSnafu;
use crate::error::Result;
use crate::types::L3L4Addr;
use crate::types::Signal;

/// Actioner that adds/removes the target address on a data-plane interface.
#[derive(Default)]
pub struct DpvsAddrAction {
    vip: Option<IpAddr>,
    dpvs_ifname: String,
    client: Option<Arc<dyn DataPlaneClient>>,
}

#[async_trait]
impl ActionMethod for DpvsAddrAction {
    fn validate(&self, params: &Params) -> Result<()> {
        check_action_params(
            ActionKind::DpvsAddrAddDel,
            params,
            &["dpvs-ifname"],
            &["dpvs-ifname"],
        )?;
        if params.get("dpvs-ifname").is_some_and(String::is_empty) {
            return ConfigInvalidSnafu { message: "empty action param dpvs-ifname" }.fail();
        }
        Ok(())
    }

    fn create(
        &self,
        target: &L3L4Addr,
        params: &Params,
        deps: &ActionDeps,
    ) -> Result<Box<dyn ActionMethod>> {
        require_target_ip(ActionKind::DpvsAddrAddDel, target)?;
        self.validate(params)?;
        let Some(client) = deps.data_plane.clone() else {
            return ConfigInvalidSnafu {
                message: "DpvsAddrAddDel actioner requires a data-plane client",
            }
            .fail();
        };
        Ok(Box::new(DpvsAddrAction {
            vip: Some(target.ip),
            dpvs_ifname: params.get("dpvs-ifname").cloned().unwrap_or_default(),
            client: Some(client),
        }))
    }

    async fn act(&self, signal: Signal, timeout: Duration) -> Result<()> {
        let (vip, client) = match (self.vip, &self.client) {
            (Some(vip), Some(client)) => (vip, client),
            _ => {
                return ActionTransportSnafu { message: "DpvsAddrAddDel actioner is unbound" }
                    .fail()
            }
        };

        bounded(ActionKind::DpvsAddrAddDel, timeout, async {
            let result = match signal {
                Signal::Up => client.add_vip(vip, &self.dpvs_ifname).await,
                Signal::Down => client.del_vip(vip, &self.dpvs_ifname).await,
            };
            result.map_err(|err| {
                ActionTransportSnafu {
                    message: format!("data-plane address {signal} for {vip}: {err}"),
                }
                .build()
            })
        })
        .await?;

        debug!(vip = %vip, ifname = %self.dpvs_ifname, signal = %signal,
            "data-plane address updated");
        Ok(())
    }
}

/// Composition of the kernel and data-plane address actioners.
#[derive(Default)]
pub struct DpvsAddrKernelRouteAction {
    dpvs: DpvsAddrAction,
    kernel: KernelRouteAction,
}

const KERNEL_PARAMS: &[&str] = &["ifname", "with-route"];
const DPVS_PARAMS: &[&str] = &["dpvs-ifname"];

fn split_params(params: &Params) -> (Params, Params) {
    let mut kernel = Params::new();
    let mut dpvs = Params::new();
    for (key, val) in params {
        if KERNEL_PARAMS.contains(&key.as_str()) {
            kernel.insert(key.clone(), val.clone());
        } else if DPVS_PARAMS.contains(&key.as_str()) {
            dpvs.insert(key.clone(), val.clone());
        }
    }
    (kernel, dpvs)
}

#[async_trait]
impl ActionMethod for DpvsAddrKernelRouteAction {
    fn validate(&self, params: &Params) -> Result<()> {
        check_action_params(
            ActionKind::DpvsAddrKernelRouteAddDel,
            params,
            &["ifname", "dpvs-ifname"],
            &["ifname", "with-route", "dpvs-ifname"],
        )?;
        let (kernel, dpvs) = split_params(params);
        self.kernel.validate(&kernel)?;
        self.dpvs.validate(&dpvs)
    }

    fn create(
        &self,
        target: &L3L4Addr,
        params: &Params,
        deps: &ActionDeps,
    ) -> Result<Box<dyn ActionMethod>> {
        require_target_ip(ActionKind::DpvsAddrKernelRouteAddDel, target)?;
        self.validate(params)?;
        let Some(client) = deps.data_plane.clone() else {
            return ConfigInvalidSnafu {
                message: "DpvsAddrKernelRouteAddDel actioner requires a data-plane client",
            }
            .fail();
        };
        Ok(Box::new(DpvsAddrKernelRouteAction {
            dpvs: DpvsAddrAction {
                vip: Some(target.ip),
                dpvs_ifname: params.get("dpvs-ifname").cloned().unwrap_or_default(),
                client: Some(client),
            },
            kernel: KernelRouteAction::from_parts(
                *target,
                params.get("ifname").cloned().unwrap_or_default(),
                params
                    .get("with-route")
                    .map(|v| crate::config::parse_bool(v))
                    .transpose()?
                    .unwrap_or(false),
            ),
        }))
    }

    async fn act(&self, signal: Signal, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return ConfigInvalidSnafu {
                message: "zero timeout on DpvsAddrKernelRouteAddDel actioner",
            }
            .fail();
        }
        let deadline = Instant::now() + timeout;
        let remaining = |deadline: Instant| -> Result<Duration> {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return ActionTimeoutSnafu { timeout_ms: timeout.as_millis() as u64 }.fail();
            }
            Ok(left)
        };

        // Kernel first on the way up, data plane first on the way down.
        match signal {
            Signal::Up => {
                self.kernel.act(signal, remaining(deadline)?).await?;
                self.dpvs.act(signal, remaining(deadline)?).await?;
            }
            Signal::Down => {
                self.dpvs.act(signal, remaining(deadline)?).await?;
                self.kernel.act(signal, remaining(deadline)?).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DataPlaneResult;
    use crate::types::IpProto;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<(IpAddr, String, Signal)>>,
    }

    #[async_trait]
    impl DataPlaneClient for RecordingClient {
        async fn update_backend(&self, _backend: &L3L4Addr, _signal: Signal) -> DataPlaneResult {
            Ok(())
        }

        async fn add_vip(&self, vip: IpAddr, ifname: &str) -> DataPlaneResult {
            self.calls.lock().push((vip, ifname.to_string(), Signal::Up));
            Ok(())
        }

        async fn del_vip(&self, vip: IpAddr, ifname: &str) -> DataPlaneResult {
            self.calls.lock().push((vip, ifname.to_string(), Signal::Down));
            Ok(())
        }
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn target() -> L3L4Addr {
        L3L4Addr::new("192.0.2.1".parse().unwrap(), 0, IpProto::Tcp)
    }

    #[tokio::test]
    async fn vip_signals_reach_the_client() {
        let client = Arc::new(RecordingClient::default());
        let deps = ActionDeps { data_plane: Some(client.clone()) };
        let action = DpvsAddrAction::default()
            .create(&target(), &params(&[("dpvs-ifname", "dpdk0")]), &deps)
            .unwrap();

        action.act(Signal::Up, Duration::from_secs(1)).await.unwrap();
        action.act(Signal::Down, Duration::from_secs(1)).await.unwrap();

        let calls = client.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].2, Signal::Up);
        assert_eq!(calls[1].2, Signal::Down);
        assert_eq!(calls[0].1, "dpdk0");
    }

    #[test]
    fn dpvs_validate_requires_ifname() {
        let action = DpvsAddrAction::default();
        assert!(action.validate(&Params::new()).is_err());
        assert!(action.validate(&params(&[("dpvs-ifname", "dpdk0")])).is_ok());
        assert!(action.validate(&params(&[("dpvs-ifname", "")])).is_err());
    }

    #[test]
    fn composite_validates_both_param_sets() {
        let action = DpvsAddrKernelRouteAction::default();
        assert!(action
            .validate(&params(&[("ifname", "lo"), ("dpvs-ifname", "dpdk0")]))
            .is_ok());
        assert!(action.validate(&params(&[("ifname", "lo")])).is_err());
        assert!(action.validate(&params(&[("dpvs-ifname", "dpdk0")])).is_err());
        assert!(action
            .validate(&params(&[("ifname", "lo"), ("dpvs-ifname", "dpdk0"), ("mtu", "9000")]))
            .is_err());
    }
}
