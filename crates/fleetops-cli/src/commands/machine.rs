//! `register` / `list` / `get` — machine inventory commands.

use anyhow::Result;
use fleetops_client::FleetClient;
use fleetops_proto::pb;

use crate::style::{print_row_table, print_success, SemanticStyle};

pub async fn register(server: &str) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let machine = client
        .register_machine(pb::Machine {
            machine_id: String::new(),
            labels: Default::default(),
            spec: Some(pb::MachineSpec::default()),
            status: None,
        })
        .await?;
    print_success(&format!("registered {}", machine.machine_id.header()));
    Ok(())
}

pub async fn list(server: &str) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let machines = client.list_machines().await?;

    let columns = vec!["machine_id".to_string(), "phase".to_string(), "active_operation".to_string()];
    let rows = machines
        .iter()
        .map(|m| {
            let status = m.status.clone().unwrap_or_default();
            vec![
                m.machine_id.clone(),
                phase_name(status.phase),
                status.active_operation_id,
            ]
        })
        .collect::<Vec<_>>();

    print_row_table(&columns, &rows, "No machines registered.");
    Ok(())
}

pub async fn get(server: &str, machine_id: &str) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let machine = client.get_machine(machine_id.to_string()).await?;
    let status = machine.status.unwrap_or_default();

    let entries = [
        ("machine_id", machine.machine_id.as_str()),
        ("phase", &phase_name(status.phase)),
        ("active_operation", status.active_operation_id.as_str()),
    ];
    crate::style::print_info_table(&entries);
    Ok(())
}

fn phase_name(phase: i32) -> String {
    pb::Phase::try_from(phase)
        .map(|p| p.as_str_name().to_string())
        .unwrap_or_else(|_| "PHASE_UNKNOWN".to_string())
}
