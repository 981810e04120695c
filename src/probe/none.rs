//! Always-healthy probe, for targets whose health is managed elsewhere.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::Params;
use crate::error::ProbeProgrammerSnafu;
use crate::error::Result;
use crate::probe::reject_unknown_params;
use crate::probe::CheckMethod;
use crate::types::L3L4Addr;
use crate::types::State;

/// Probe that returns [`State::Healthy`] unconditionally.
#[derive(Debug, Default, Clone)]
pub struct NoneChecker;

#[async_trait]
impl CheckMethod for NoneChecker {
    fn validate(&self, params: &Params) -> Result<()> {
        reject_unknown_params("none", params, &[])
    }

    fn create(&self, params: &Params) -> Result<Box<dyn CheckMethod>> {
        self.validate(params)?;
        Ok(Box::new(NoneChecker))
    }

    async fn check(&self, _target: &L3L4Addr, timeout: Duration) -> Result<State> {
        if timeout.is_zero() {
            return ProbeProgrammerSnafu { message: "zero timeout on none check" }.fail();
        }
        Ok(State::Healthy)
    }
}
