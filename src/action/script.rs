//! External script actioner.
//!
//! Runs `script <args…> <UP|DOWN>` and treats exit code 0 as success. The
//! child is killed if the action is abandoned at its timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::action::bounded;
use crate::action::check_action_params;
use crate::action::require_target_ip;
use crate::action::ActionDeps;
use crate::action::ActionKind;
use crate::action::ActionMethod;
use crate::config::Params;
use crate::error::ActionTransportSnafu;
use crate::error::ConfigInvalidSnafu;
use crate::error::Result;
use crate::types::L3L4Addr;
use crate::types::Signal;

const KIND: ActionKind = ActionKind::Script;

/// Actioner that delegates reconciliation to an operator-provided script.
#[derive(Debug, Clone)]
pub struct ScriptAction {
    target: L3L4Addr,
    script: String,
    args: Vec<String>,
}

impl Default for ScriptAction {
    fn default() -> Self {
        Self {
            target: L3L4Addr::new(
                std::net::Ipv4Addr::UNSPECIFIED.into(),
                0,
                crate::types::IpProto::Tcp,
            ),
            script: String::new(),
            args: Vec::new(),
        }
    }
}

#[async_trait]
impl ActionMethod for ScriptAction {
    fn validate(&self, params: &Params) -> Result<()> {
        check_action_params(KIND, params, &["script"], &["script", "args"])?;
        if params.get("script").is_some_and(String::is_empty) {
            return ConfigInvalidSnafu { message: "empty action param script" }.fail();
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
        Ok(Box::new(ScriptAction {
            target: *target,
            script: params.get("script").cloned().unwrap_or_default(),
            args: params
                .get("args")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }))
    }

    async fn act(&self, signal: Signal, timeout: Duration) -> Result<()> {
        bounded(KIND, timeout, async {
            let status = Command::new(&self.script)
                .args(&self.args)
                .arg(signal.to_string())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|err| {
                    ActionTransportSnafu {
                        message: format!("failed to run script {}: {err}", self.script),
                    }
                    .build()
                })?;

            if !status.success() {
                return ActionTransportSnafu {
                    message: format!("script {} {signal} exited with {status}", self.script),
                }
                .fail();
            }
            Ok(())
        })
        .await?;

        debug!(target = %self.target, script = %self.script, signal = %signal,
            "script actioner succeeded");
        Ok(())
    }
}
