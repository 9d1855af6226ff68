//! End-to-end smoke test: register a machine, flip it READY, reboot it, and
//! watch the operation reach a terminal phase — exercising the same
//! store/executor/provider wiring `main` assembles, over a real client/server
//! connection instead of in-process method calls.

use std::collections::HashMap;
use std::time::Duration;

use fleetops_proto::pb;
use fleetops_test_harness::TestFleet;
use fleetops_types::MachineSpec;

#[tokio::test]
async fn reboot_reaches_a_terminal_phase_over_the_wire() {
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

    fleet
        .store
        .mutate_machine(&fleetops_types::MachineId::new(registered.machine_id.clone()), |m| {
            m.status.phase = fleetops_types::Phase::Ready;
        })
        .await
        .unwrap();

    let operation = fleet.client.reboot_machine(registered.machine_id.clone(), "req-1").await.unwrap();

    let mut terminal = false;
    for _ in 0..200 {
        let fetched = fleet.client.get_operation(operation.operation_id.clone()).await.unwrap();
        if fetched.phase == pb::OperationPhase::Succeeded as i32
            || fetched.phase == pb::OperationPhase::Failed as i32
        {
            terminal = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(terminal, "reboot operation never reached a terminal phase");

    fleet.shutdown().await;
}
