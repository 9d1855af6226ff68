//! `logs` — tail an operation's log chunk stream.

use anyhow::Result;
use fleetops_client::FleetClient;
use fleetops_proto::pb;
use tokio_stream::StreamExt;

pub async fn run(server: &str, operation_id: &str) -> Result<()> {
    let mut client = FleetClient::connect(server.to_string()).await?;
    let mut chunks = client.stream_operation_logs(operation_id.to_string()).await?;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        let text = String::from_utf8_lossy(&chunk.data);
        match pb::LogStream::try_from(chunk.stream) {
            Ok(pb::LogStream::Stderr) => eprint!("{text}"),
            _ => print!("{text}"),
        }
    }

    Ok(())
}
