//! The gRPC service shell: wires a [`fleetops_store::Store`] and
//! [`fleetops_executor::Runner`] behind the generated tonic services,
//! validating requests and gating on preconditions at the edge.

pub mod error;
pub mod service;
pub mod shutdown;

pub use error::{ServeError, ServerError, ServerResult};
pub use shutdown::ShutdownHandle;

use std::net::SocketAddr;
use std::sync::Arc;

use fleetops_executor::Runner;
use fleetops_proto::pb::machine_service_server::MachineServiceServer;
use fleetops_proto::pb::operation_service_server::OperationServiceServer;
use fleetops_provider::Provider;
use fleetops_store::Store;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::service::FleetService;

/// Binds `addr` and serves both gRPC services until [`ShutdownHandle::shutdown`]
/// is called. Returns only once `addr` is actually bound — the bind happens
/// on this task before the server loop is spawned, so a caller that connects
/// immediately after this returns is never racing the listener coming up.
pub async fn serve<P: Provider + 'static>(
    addr: SocketAddr,
    store: Arc<Store>,
    runner: Arc<Runner<P>>,
) -> Result<ShutdownHandle<P>, ServeError> {
    let listener = TcpListener::bind(addr).await.map_err(|source| ServeError::Bind { addr, source })?;
    let incoming = TcpListenerStream::new(listener);

    let service = FleetService::new(store, runner.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = Server::builder()
        .add_service(MachineServiceServer::new(service.clone()))
        .add_service(OperationServiceServer::new(service))
        .serve_with_incoming_shutdown(incoming, async {
            let _ = shutdown_rx.await;
        });

    tokio::spawn(async move {
        if let Err(err) = server.await {
            tracing::error!(%err, "gRPC server exited with an error");
        }
    });

    Ok(ShutdownHandle::new(runner, shutdown_tx))
}
