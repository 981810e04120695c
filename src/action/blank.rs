//! No-op actioner for targets whose state is reconciled elsewhere.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::action::check_action_params;
use crate::action::require_target_ip;
use crate::action::ActionDeps;
use crate::action::ActionKind;
use crate::action::ActionMethod;
use crate::config::Params;
use crate::error::Result;
use crate::types::L3L4Addr;
use crate::types::Signal;

/// Actioner that records the signal in the log and does nothing else.
#[derive(Debug, Clone)]
pub struct BlankAction {
    target: L3L4Addr,
}

impl Default for BlankAction {
    fn default() -> Self {
        Self {
            target: L3L4Addr::new(
                std::net::Ipv4Addr::UNSPECIFIED.into(),
                0,
                crate::types::IpProto::Tcp,
            ),
        }
    }
}

#[async_trait]
impl ActionMethod for BlankAction {
    fn validate(&self, params: &Params) -> Result<()> {
        check_action_params(ActionKind::Blank, params, &[], &[])
    }

    fn create(
        &self,
        target: &L3L4Addr,
        params: &Params,
        _deps: &ActionDeps,
    ) -> Result<Box<dyn ActionMethod>> {
        require_target_ip(ActionKind::Blank, target)?;
        self.validate(params)?;
        Ok(Box::new(BlankAction { target: *target }))
    }

    async fn act(&self, signal: Signal, _timeout: Duration) -> Result<()> {
        debug!(target = %self.target, signal = %signal, "blank actioner applied");
        Ok(())
    }
}
