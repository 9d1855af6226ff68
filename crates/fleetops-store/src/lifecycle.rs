//! Pure derivation of a machine's effective state from its stored status and
//! its active operation, kept separate from any storage concern so it can be
//! exercised directly in property tests.

use chrono::Utc;
use fleetops_types::{condition_types, Condition, EffectiveState, Machine, Operation, OperationPhase, Phase};

/// Computes the derived `EffectiveState` for a machine given its (possibly
/// absent) active operation. Never stored — always recomputed on read.
///
/// Precedence (first match wins):
/// 1. An active operation (PENDING/RUNNING) in flight → `Provisioning`.
/// 2. A non-steady explicit phase (RMA/RETIRED/MAINTENANCE) → that phase.
/// 3. `InCustomerCluster=true` → `InService`.
/// 4. `FactoryReady` phase → `FactoryReady`.
/// 5. Otherwise → `Ready`.
pub fn effective_state(machine: &Machine, active_op: Option<&Operation>) -> EffectiveState {
    if let Some(op) = active_op {
        if matches!(op.phase, OperationPhase::Pending | OperationPhase::Running) {
            return EffectiveState::Provisioning;
        }
    }

    match machine.status.phase {
        Phase::Rma => return EffectiveState::Rma,
        Phase::Retired => return EffectiveState::Retired,
        Phase::Maintenance => return EffectiveState::Maintenance,
        _ => {}
    }

    if machine
        .status
        .condition(condition_types::IN_CUSTOMER_CLUSTER)
        .is_some_and(|c| c.status)
    {
        return EffectiveState::InService;
    }

    if machine.status.phase == Phase::FactoryReady {
        return EffectiveState::FactoryReady;
    }

    EffectiveState::Ready
}

/// Replaces the condition matching `type_` or appends a new one.
/// `last_transition` only advances when `status` actually changes.
pub fn set_condition(
    machine: &mut Machine,
    type_: &str,
    status: bool,
    reason: impl Into<String>,
    message: impl Into<String>,
) {
    let now = Utc::now();
    if let Some(existing) = machine
        .status
        .conditions
        .iter_mut()
        .find(|c| c.type_ == type_)
    {
        let changed = existing.status != status;
        existing.status = status;
        existing.reason = reason.into();
        existing.message = message.into();
        if changed {
            existing.last_transition = now;
        }
        return;
    }

    machine.status.conditions.push(Condition::new(
        type_,
        status,
        reason,
        message,
        now,
    ));
}

/// Removes the condition with the given type, if present. Used when a
/// successful operation clears a stale `NeedsIntervention`/`OperationCanceled`.
pub fn clear_condition(machine: &mut Machine, type_: &str) {
    machine.status.conditions.retain(|c| c.type_ != type_);
}

/// Unconditionally assigns the machine's phase. Phase is otherwise only ever
/// mutated by the executor completing ENTER_MAINTENANCE/EXIT_MAINTENANCE.
pub fn set_machine_phase(machine: &mut Machine, phase: Phase) {
    machine.status.phase = phase;
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetops_types::{MachineSpec, MachineStatus, OperationId, OperationType};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn machine_with_phase(phase: Phase) -> Machine {
        Machine {
            machine_id: fleetops_types::MachineId::new("m-1"),
            spec: MachineSpec::default(),
            labels: HashMap::new(),
            status: MachineStatus {
                phase,
                active_operation_id: None,
                conditions: vec![],
            },
        }
    }

    fn active_op() -> Operation {
        Operation {
            operation_id: OperationId::new("op-1"),
            machine_id: fleetops_types::MachineId::new("m-1"),
            request_id: "r-1".into(),
            type_: OperationType::Reboot,
            params: HashMap::new(),
            phase: OperationPhase::Running,
            error: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
            plan_id: "plan/reboot".into(),
            steps: vec![],
        }
    }

    #[test]
    fn active_operation_takes_precedence_over_everything() {
        let machine = machine_with_phase(Phase::Maintenance);
        let op = active_op();
        assert_eq!(effective_state(&machine, Some(&op)), EffectiveState::Provisioning);
    }

    #[test]
    fn terminal_operation_does_not_count_as_active() {
        let machine = machine_with_phase(Phase::Ready);
        let mut op = active_op();
        op.phase = OperationPhase::Succeeded;
        assert_eq!(effective_state(&machine, Some(&op)), EffectiveState::Ready);
    }

    #[test]
    fn non_steady_phase_wins_over_in_customer_cluster() {
        let mut machine = machine_with_phase(Phase::Rma);
        set_condition(&mut machine, condition_types::IN_CUSTOMER_CLUSTER, true, "x", "y");
        assert_eq!(effective_state(&machine, None), EffectiveState::Rma);
    }

    #[test]
    fn in_customer_cluster_wins_over_factory_ready() {
        let mut machine = machine_with_phase(Phase::FactoryReady);
        set_condition(&mut machine, condition_types::IN_CUSTOMER_CLUSTER, true, "x", "y");
        assert_eq!(effective_state(&machine, None), EffectiveState::InService);
    }

    #[test]
    fn factory_ready_is_the_default_initial_state() {
        let machine = machine_with_phase(Phase::FactoryReady);
        assert_eq!(effective_state(&machine, None), EffectiveState::FactoryReady);
    }

    #[test]
    fn ready_is_the_fallback() {
        let machine = machine_with_phase(Phase::Ready);
        assert_eq!(effective_state(&machine, None), EffectiveState::Ready);
    }

    #[test]
    fn set_condition_only_bumps_transition_time_on_change() {
        let mut machine = machine_with_phase(Phase::Ready);
        set_condition(&mut machine, "Reachable", true, "Ping", "ok");
        let first = machine.status.condition("Reachable").unwrap().last_transition;
        set_condition(&mut machine, "Reachable", true, "Ping", "ok still");
        let second = machine.status.condition("Reachable").unwrap().last_transition;
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn effective_state_always_matches_the_documented_precedence(
            active_is_pending_or_running in any::<bool>(),
            phase_idx in 0..5u8,
            in_customer_cluster in any::<bool>(),
        ) {
            let phase = match phase_idx {
                0 => Phase::FactoryReady,
                1 => Phase::Ready,
                2 => Phase::Maintenance,
                3 => Phase::Rma,
                _ => Phase::Retired,
            };
            let mut machine = machine_with_phase(phase);
            if in_customer_cluster {
                set_condition(&mut machine, condition_types::IN_CUSTOMER_CLUSTER, true, "x", "y");
            }
            let mut op = active_op();
            op.phase = if active_is_pending_or_running {
                OperationPhase::Running
            } else {
                OperationPhase::Succeeded
            };
            let op_opt = Some(&op);

            let result = effective_state(&machine, op_opt);

            let expected = if active_is_pending_or_running {
                EffectiveState::Provisioning
            } else if phase == Phase::Rma {
                EffectiveState::Rma
            } else if phase == Phase::Retired {
                EffectiveState::Retired
            } else if phase == Phase::Maintenance {
                EffectiveState::Maintenance
            } else if in_customer_cluster {
                EffectiveState::InService
            } else if phase == Phase::FactoryReady {
                EffectiveState::FactoryReady
            } else {
                EffectiveState::Ready
            };

            prop_assert_eq!(result, expected);
        }
    }
}
