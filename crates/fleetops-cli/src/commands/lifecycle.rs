//! `reboot` / `reimage` / `enter-maintenance` / `exit-maintenance` / `cancel`
//! — operations that mutate a machine's lifecycle phase.

use anyhow::Result;
use fleetops_client::FleetClient;
use fleetops_proto::pb;

use crate::style::{print_success, SemanticStyle};

fn request_id(explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub async fn reboot(server: &str, machine_id: &str, request_id_opt: Option<String>) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let op = client.reboot_machine(machine_id.to_string(), request_id(request_id_opt)).await?;
    print_operation(&op);
    Ok(())
}

pub async fn reimage(
    server: &str,
    machine_id: &str,
    image_ref: Option<String>,
    request_id_opt: Option<String>,
) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let op = client
        .reimage_machine(machine_id.to_string(), request_id(request_id_opt), image_ref.unwrap_or_default())
        .await?;
    print_operation(&op);
    Ok(())
}

pub async fn enter_maintenance(server: &str, machine_id: &str, request_id_opt: Option<String>) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let op = client.enter_maintenance(machine_id.to_string(), request_id(request_id_opt)).await?;
    print_operation(&op);
    Ok(())
}

pub async fn exit_maintenance(server: &str, machine_id: &str, request_id_opt: Option<String>) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let op = client.exit_maintenance(machine_id.to_string(), request_id(request_id_opt)).await?;
    print_operation(&op);
    Ok(())
}

pub async fn cancel(server: &str, operation_id: &str) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let op = client.cancel_operation(operation_id.to_string()).await?;
    print_operation(&op);
    Ok(())
}

fn print_operation(op: &pb::Operation) {
    let phase = pb::OperationPhase::try_from(op.phase)
        .map(|p| p.as_str_name().to_string())
        .unwrap_or_else(|_| "OPERATION_PHASE_UNKNOWN".to_string());
    print_success(&format!(
        "{} on {} is {}",
        op.operation_id.header(),
        op.machine_id,
        phase.info()
    ));
}
