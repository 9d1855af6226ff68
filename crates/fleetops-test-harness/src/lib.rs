//! Builder API wrapping an in-memory [`Store`] + [`Runner`] behind a real,
//! in-process gRPC server. Tests that need the full register→operate→watch
//! path without a standalone binary reach for [`TestFleet`] instead of
//! exercising `FleetService` directly.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use fleetops_client::{ClientError, FleetClient};
use fleetops_executor::{RetryConfig, Runner};
use fleetops_provider::{FakeProvider, FakeProviderConfig};
use fleetops_server::{ServeError, ShutdownHandle};
use fleetops_store::plan::PlanRegistry;
use fleetops_store::Store;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to reserve a local port: {0}")]
    Port(#[source] std::io::Error),
    #[error("in-process server failed to start: {0}")]
    Serve(#[from] ServeError),
    #[error("client failed to connect to the in-process server: {0}")]
    Connect(#[from] ClientError),
}

/// Builds a [`TestFleet`]. Defaults match `fleetops-config`'s own defaults
/// (`FakeProvider`, `RetryConfig::default()`); override either for tests
/// that need injected failures or a tighter retry budget.
#[derive(Default)]
pub struct TestFleetBuilder {
    provider_config: FakeProviderConfig,
    retry_config: RetryConfig,
}

impl TestFleetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider_config(mut self, config: FakeProviderConfig) -> Self {
        self.provider_config = config;
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Binds an ephemeral local port, starts the gRPC server on it, and
    /// connects a [`FleetClient`] to it. Returns once the client is
    /// connected — callers don't need to poll for the server coming up.
    pub async fn build(self) -> Result<TestFleet, HarnessError> {
        let addr = reserve_local_addr()?;

        let store = Arc::new(Store::new());
        let provider = Arc::new(FakeProvider::with_config(self.provider_config));
        let plans = Arc::new(PlanRegistry::with_builtins());
        let runner = Runner::new(store.clone(), provider, plans, self.retry_config);

        let shutdown = fleetops_server::serve(addr, store.clone(), runner.clone()).await?;
        let client = FleetClient::connect(format!("http://{addr}")).await?;

        Ok(TestFleet { store, runner, addr, client, shutdown })
    }
}

/// A running store + executor + gRPC server, with a client already
/// connected to it. Dropping this without calling [`TestFleet::shutdown`]
/// leaves the server task running until the test process exits — fine for
/// short-lived tests, but long-running suites should shut down explicitly.
pub struct TestFleet {
    pub store: Arc<Store>,
    pub runner: Arc<Runner<FakeProvider>>,
    pub addr: SocketAddr,
    pub client: FleetClient,
    shutdown: ShutdownHandle<FakeProvider>,
}

impl TestFleet {
    pub fn builder() -> TestFleetBuilder {
        TestFleetBuilder::new()
    }

    /// Cancels every tracked operation and stops the server, draining
    /// in-flight streams.
    pub async fn shutdown(self) {
        self.shutdown.shutdown().await;
    }
}

/// Binds port 0 to let the OS pick a free port, reads it back, then drops
/// the listener so the server can bind the same address. Races with any
/// other process grabbing the port in between; acceptable for tests.
fn reserve_local_addr() -> Result<SocketAddr, HarnessError> {
    let listener = TcpListener::bind("127.0.0.1:0").map_err(HarnessError::Port)?;
    listener.local_addr().map_err(HarnessError::Port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetops_proto::pb;
    use fleetops_types::MachineSpec;
    use std::collections::HashMap;

    #[tokio::test]
    async fn builds_and_serves_a_registered_machine_round_trip() {
        let mut fleet = TestFleet::builder().build().await.unwrap();

        let registered = fleet
            .client
            .register_machine(pb::Machine {
                machine_id: String::new(),
                labels: HashMap::new(),
                spec: Some(pb::MachineSpec::from(&MachineSpec::default())),
                status: None,
            })
            .await
            .unwrap();

        let fetched = fleet.client.get_machine(registered.machine_id.clone()).await.unwrap();
        assert_eq!(fetched.machine_id, registered.machine_id);

        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn with_provider_config_is_visible_to_the_running_executor() {
        let fleet = TestFleet::builder()
            .with_provider_config(FakeProviderConfig::default().with_failures("reboot", 1))
            .build()
            .await
            .unwrap();

        assert_eq!(fleet.addr.ip().to_string(), "127.0.0.1");
        fleet.shutdown().await;
    }
}
