//! Typed wrapper over the generated tonic clients for the fleet control
//! plane. Call sites get plain async methods instead of hand-rolling
//! `Request::new(...)` / `.into_inner()` boilerplate at every use site.

pub mod error;

pub use error::{ClientError, ClientResult};

use fleetops_proto::pb;
use fleetops_proto::pb::machine_service_client::MachineServiceClient;
use fleetops_proto::pb::operation_service_client::OperationServiceClient;
use tonic::transport::Channel;
use tonic::{Request, Streaming};
use tracing::instrument;

/// A connected handle to both fleet gRPC services. Cheap to clone — the
/// underlying `tonic::transport::Channel` is reference-counted.
#[derive(Clone)]
pub struct FleetClient {
    machines: MachineServiceClient<Channel>,
    operations: OperationServiceClient<Channel>,
}

impl FleetClient {
    /// Connects to `endpoint` (e.g. `"http://127.0.0.1:7443"`) and builds
    /// both service clients over the same channel.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: impl Into<String>) -> ClientResult<Self> {
        let endpoint = endpoint.into();
        let channel = Channel::from_shared(endpoint.clone())
            .map_err(|source| ClientError::Connect { endpoint: endpoint.clone(), source })?
            .connect()
            .await
            .map_err(|source| ClientError::Connect { endpoint, source })?;

        Ok(Self {
            machines: MachineServiceClient::new(channel.clone()),
            operations: OperationServiceClient::new(channel),
        })
    }

    #[instrument(skip(self, machine))]
    pub async fn register_machine(&mut self, machine: pb::Machine) -> ClientResult<pb::Machine> {
        let resp = self
            .machines
            .register_machine(Request::new(pb::RegisterMachineRequest { machine: Some(machine) }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn get_machine(&mut self, machine_id: impl Into<String> + std::fmt::Debug) -> ClientResult<pb::Machine> {
        let resp = self
            .machines
            .get_machine(Request::new(pb::GetMachineRequest { machine_id: machine_id.into() }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn list_machines(&mut self) -> ClientResult<Vec<pb::Machine>> {
        let resp = self
            .machines
            .list_machines(Request::new(pb::ListMachinesRequest {}))
            .await?;
        Ok(resp.into_inner().machines)
    }

    #[instrument(skip(self, machine))]
    pub async fn update_machine(&mut self, machine: pb::Machine) -> ClientResult<pb::Machine> {
        let resp = self
            .machines
            .update_machine(Request::new(pb::UpdateMachineRequest { machine: Some(machine) }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn reboot_machine(
        &mut self,
        machine_id: impl Into<String> + std::fmt::Debug,
        request_id: impl Into<String>,
    ) -> ClientResult<pb::Operation> {
        let resp = self
            .machines
            .reboot_machine(Request::new(pb::RebootMachineRequest {
                machine_id: machine_id.into(),
                request_id: request_id.into(),
            }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn reimage_machine(
        &mut self,
        machine_id: impl Into<String> + std::fmt::Debug,
        request_id: impl Into<String>,
        image_ref: impl Into<String>,
    ) -> ClientResult<pb::Operation> {
        let resp = self
            .machines
            .reimage_machine(Request::new(pb::ReimageMachineRequest {
                machine_id: machine_id.into(),
                request_id: request_id.into(),
                image_ref: image_ref.into(),
            }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn enter_maintenance(
        &mut self,
        machine_id: impl Into<String> + std::fmt::Debug,
        request_id: impl Into<String>,
    ) -> ClientResult<pb::Operation> {
        let resp = self
            .machines
            .enter_maintenance(Request::new(pb::EnterMaintenanceRequest {
                machine_id: machine_id.into(),
                request_id: request_id.into(),
            }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn exit_maintenance(
        &mut self,
        machine_id: impl Into<String> + std::fmt::Debug,
        request_id: impl Into<String>,
    ) -> ClientResult<pb::Operation> {
        let resp = self
            .machines
            .exit_maintenance(Request::new(pb::ExitMaintenanceRequest {
                machine_id: machine_id.into(),
                request_id: request_id.into(),
            }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn cancel_operation(
        &mut self,
        operation_id: impl Into<String> + std::fmt::Debug,
    ) -> ClientResult<pb::Operation> {
        let resp = self
            .machines
            .cancel_operation(Request::new(pb::CancelOperationRequest { operation_id: operation_id.into() }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn get_operation(
        &mut self,
        operation_id: impl Into<String> + std::fmt::Debug,
    ) -> ClientResult<pb::Operation> {
        let resp = self
            .operations
            .get_operation(Request::new(pb::GetOperationRequest { operation_id: operation_id.into() }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn list_operations(&mut self, machine_id: Option<String>) -> ClientResult<Vec<pb::Operation>> {
        let resp = self
            .operations
            .list_operations(Request::new(pb::ListOperationsRequest {
                machine_id: machine_id.unwrap_or_default(),
            }))
            .await?;
        Ok(resp.into_inner().operations)
    }

    #[instrument(skip(self))]
    pub async fn watch_operations(
        &mut self,
        machine_id: Option<String>,
    ) -> ClientResult<Streaming<pb::OperationEvent>> {
        let resp = self
            .operations
            .watch_operations(Request::new(pb::WatchOperationsRequest {
                machine_id: machine_id.unwrap_or_default(),
            }))
            .await?;
        Ok(resp.into_inner())
    }

    #[instrument(skip(self))]
    pub async fn stream_operation_logs(
        &mut self,
        operation_id: impl Into<String> + std::fmt::Debug,
    ) -> ClientResult<Streaming<pb::LogChunk>> {
        let resp = self
            .operations
            .stream_operation_logs(Request::new(pb::StreamOperationLogsRequest {
                operation_id: operation_id.into(),
            }))
            .await?;
        Ok(resp.into_inner())
    }
}
