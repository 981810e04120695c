//! Backend-table actioner: marks the backend up or down in the load
//! balancer through the data-plane client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::action::bounded;
use crate::action::check_action_params;
use crate::action::require_target_ip;
use crate::action::ActionDeps;
use crate::action::ActionKind;
use crate::action::ActionMethod;
use crate::action::DataPlaneClient;
use crate::config::Params;
use crate::error::ActionTransportSnafu;
use crate::error::ConfigInvalidSnafu;
use crate::error::Result;
use crate::types::L3L4Addr;
use crate::types::Signal;

/// Actioner that updates a virtual-server backend's availability.
#[derive(Default)]
pub struct BackendUpdateAction {
    backend: Option<L3L4Addr>,
    client: Option<Arc<dyn DataPlaneClient>>,
}

#[async_trait]
impl ActionMethod for BackendUpdateAction {
    fn validate(&self, params: &Params) -> Result<()> {
        check_action_params(ActionKind::BackendUpdate, params, &[], &[])
    }

    fn create(
        &self,
        target: &L3L4Addr,
        params: &Params,
        deps: &ActionDeps,
    ) -> Result<Box<dyn ActionMethod>> {
        require_target_ip(ActionKind::BackendUpdate, target)?;
        self.validate(params)?;
        let Some(client) = deps.data_plane.clone() else {
            return ConfigInvalidSnafu {
                message: "BackendUpdate actioner requires a data-plane client",
            }
            .fail();
        };
        Ok(Box::new(BackendUpdateAction { backend: Some(*target), client: Some(client) }))
    }

    async fn act(&self, signal: Signal, timeout: Duration) -> Result<()> {
        let (backend, client) = match (&self.backend, &self.client) {
            (Some(backend), Some(client)) => (backend, client),
            _ => {
                return ActionTransportSnafu { message: "BackendUpdate actioner is unbound" }.fail()
            }
        };

        bounded(ActionKind::BackendUpdate, timeout, async {
            client.update_backend(backend, signal).await.map_err(|err| {
                ActionTransportSnafu { message: format!("backend update for {backend}: {err}") }
                    .build()
            })
        })
        .await?;

        debug!(backend = %backend, signal = %signal, "backend availability updated");
        Ok(())
    }
}
