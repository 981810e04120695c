//! Kernel address and host-route actioner.
//!
//! On `Up` the target IP is added to the configured interface as a /32 (IPv4)
//! or /128 (IPv6) address, optionally together with a host route; `Down`
//! removes them. Idempotence demotions: EEXIST on add, and ENOENT/ESRCH on
//! delete, are warnings. Some kernel paths report removal of a missing
//! address only through the message text `cannot assign requested address`,
//! so that string is matched in addition to the errno.
//!
//! A fresh netlink connection is opened per `act` call and torn down on every
//! exit path; nothing netlink-scoped outlives the reconciliation.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use rtnetlink::Handle;
use rtnetlink::RouteMessageBuilder;
use tracing::debug;
use tracing::warn;

use crate::action::bounded;
use crate::action::check_action_params;
use crate::action::require_target_ip;
use crate::action::ActionDeps;
use crate::action::ActionKind;
use crate::action::ActionMethod;
use crate::config::parse_bool;
use crate::config::Params;
use crate::error::ActionTransportSnafu;
use crate::error::ConfigInvalidSnafu;
use crate::error::Error;
use crate::error::Result;
use crate::types::L3L4Addr;
use crate::types::Signal;

const KIND: ActionKind = ActionKind::KernelRouteAddDel;

/// Actioner that installs or removes the target address (and optionally a
/// host route) on a kernel interface.
#[derive(Debug, Clone)]
pub struct KernelRouteAction {
    target: L3L4Addr,
    ifname: String,
    with_route: bool,
}

impl Default for KernelRouteAction {
    fn default() -> Self {
        Self {
            target: L3L4Addr::new(
                std::net::Ipv4Addr::UNSPECIFIED.into(),
                0,
                crate::types::IpProto::Tcp,
            ),
            ifname: String::new(),
            with_route: false,
        }
    }
}

/// Errno carried by a netlink error reply, as a positive value.
fn netlink_errno(err: &rtnetlink::Error) -> Option<i32> {
    if let rtnetlink::Error::NetlinkError(msg) = err {
        msg.code.map(|code| code.get().abs())
    } else {
        None
    }
}

/// "Already exists" on an add path. Errno only; the kernel reports EEXIST
/// reliably on add, so no textual fallback is needed here.
fn exist_demotes(errno: Option<i32>) -> bool {
    errno == Some(libc::EEXIST)
}

/// "Not found" on a delete path. Some kernel paths report a missing address
/// only through the message text, so the string is matched in addition to
/// the errno.
fn not_exist_demotes(errno: Option<i32>, text: &str) -> bool {
    matches!(errno, Some(code) if code == libc::ENOENT || code == libc::ESRCH)
        || text.contains("cannot assign requested address")
}

fn is_exist_error(err: &rtnetlink::Error) -> bool {
    exist_demotes(netlink_errno(err))
}

fn is_not_exist_error(err: &rtnetlink::Error) -> bool {
    not_exist_demotes(netlink_errno(err), &err.to_string().to_lowercase())
}

fn transport(context: &str, err: impl std::fmt::Display) -> Error {
    ActionTransportSnafu { message: format!("{context}: {err}") }.build()
}

impl KernelRouteAction {
    /// Assemble a bound instance from already-validated parts. Used by the
    /// composite data-plane actioner.
    pub(crate) fn from_parts(target: L3L4Addr, ifname: String, with_route: bool) -> Self {
        Self { target, ifname, with_route }
    }

    fn prefix_len(&self) -> u8 {
        if self.target.ip.is_ipv4() {
            32
        } else {
            128
        }
    }

    async fn reconcile(&self, signal: Signal) -> Result<()> {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|err| transport("failed to open netlink connection", err))?;
        let connection = tokio::spawn(connection);
        let result = self.reconcile_with(&handle, signal).await;
        connection.abort();
        result
    }

    async fn reconcile_with(&self, handle: &Handle, signal: Signal) -> Result<()> {
        let mut links = handle.link().get().match_name(self.ifname.clone()).execute();
        let link = links
            .try_next()
            .await
            .map_err(|err| transport(&format!("failed to get link {}", self.ifname), err))?
            .ok_or_else(|| transport("link not found", &self.ifname))?;
        let index = link.header.index;

        match signal {
            Signal::Up => self.install(handle, index).await,
            Signal::Down => self.remove(handle, index).await,
        }
    }

    async fn install(&self, handle: &Handle, index: u32) -> Result<()> {
        let addr = self.target.ip;

        if let Err(err) = handle.address().add(index, addr, self.prefix_len()).execute().await {
            if is_exist_error(&err) {
                warn!(addr = %addr, ifname = %self.ifname, "address to add already exists");
            } else {
                return Err(transport(
                    &format!("failed to add address {addr} to {}", self.ifname),
                    err,
                ));
            }
        }

        if self.with_route {
            let route = self.host_route(index)?;
            if let Err(err) = handle.route().add(route).execute().await {
                if is_exist_error(&err) {
                    warn!(addr = %addr, ifname = %self.ifname, "host route to add already exists");
                } else {
                    return Err(transport(
                        &format!("failed to add host route {addr} to {}", self.ifname),
                        err,
                    ));
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, handle: &Handle, index: u32) -> Result<()> {
        let addr = self.target.ip;

        let mut existing = handle
            .address()
            .get()
            .set_link_index_filter(index)
            .set_address_filter(addr)
            .execute();
        let mut found = false;
        while let Some(message) = existing
            .try_next()
            .await
            .map_err(|err| transport(&format!("failed to list addresses on {}", self.ifname), err))?
        {
            found = true;
            if let Err(err) = handle.address().del(message).execute().await {
                if is_not_exist_error(&err) {
                    warn!(addr = %addr, ifname = %self.ifname, "address to delete does not exist");
                } else {
                    return Err(transport(
                        &format!("failed to delete address {addr} from {}", self.ifname),
                        err,
                    ));
                }
            }
        }
        if !found {
            warn!(addr = %addr, ifname = %self.ifname, "address to delete does not exist");
        }

        if self.with_route {
            let route = self.host_route(index)?;
            if let Err(err) = handle.route().del(route).execute().await {
                if is_not_exist_error(&err) {
                    warn!(addr = %addr, ifname = %self.ifname, "host route to delete does not exist");
                } else {
                    return Err(transport(
                        &format!("failed to delete route {addr} from {}", self.ifname),
                        err,
                    ));
                }
            }
        }
        Ok(())
    }

    fn host_route(&self, index: u32) -> Result<netlink_packet_route::route::RouteMessage> {
        let message = RouteMessageBuilder::<IpAddr>::new()
            .destination_prefix(self.target.ip, self.prefix_len())
            .map_err(|err| transport("failed to build host route", err))?
            .output_interface(index)
            .build();
        Ok(message)
    }
}

#[async_trait]
impl ActionMethod for KernelRouteAction {
    fn validate(&self, params: &Params) -> Result<()> {
        check_action_params(KIND, params, &["ifname"], &["ifname", "with-route"])?;
        if params.get("ifname").is_some_and(String::is_empty) {
            return ConfigInvalidSnafu { message: "empty action param ifname" }.fail();
        }
        if let Some(val) = params.get("with-route") {
            parse_bool(val)?;
        }
        Ok(())
    }

    fn create(
        &self,
        target: &L3L4Addr,
        params: &Params,
        _deps: &ActionDeps,
    ) -> Result<Box<dyn ActionMethod>> {
        require_target_ip(KIND, target)?;
        self.validate(params)?;
        let with_route = params.get("with-route").map(|v| parse_bool(v)).transpose()?.unwrap_or(false);
        Ok(Box::new(KernelRouteAction {
            target: *target,
            ifname: params.get("ifname").cloned().unwrap_or_default(),
            with_route,
        }))
    }

    async fn act(&self, signal: Signal, timeout: Duration) -> Result<()> {
        debug!(addr = %self.target.ip, ifname = %self.ifname, signal = %signal,
            "starting kernel route actioner");
        bounded(KIND, timeout, self.reconcile(signal)).await?;
        debug!(addr = %self.target.ip, ifname = %self.ifname, signal = %signal,
            "kernel route actioner succeeded");
        Ok(())
    }
}
