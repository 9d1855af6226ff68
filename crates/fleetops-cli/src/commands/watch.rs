//! `watch` — tail the operation event stream.

use anyhow::Result;
use fleetops_client::FleetClient;
use fleetops_proto::pb;
use tokio_stream::StreamExt;

use crate::style::{print_labeled, SemanticStyle};

pub async fn run(server: &str, machine_id: Option<String>) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let mut events = client.watch_operations(machine_id).await?;

    while let Some(event) = events.next().await {
        let event = event?;
        let Some(snapshot) = event.snapshot else { continue };
        let phase = pb::OperationPhase::try_from(snapshot.phase)
            .map(|p| p.as_str_name().to_string())
            .unwrap_or_else(|_| "OPERATION_PHASE_UNKNOWN".to_string());
        print_labeled(&snapshot.operation_id, &format!("{} — {}", phase, event.message).muted());
    }

    Ok(())
}
