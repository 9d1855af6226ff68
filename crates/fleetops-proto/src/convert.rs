//! Conversions between wire messages ([`crate::pb`]) and the domain types in
//! `fleetops_types`.
//!
//! `store::Phase` is a superset of `wire::Phase`: RMA/RETIRED are reachable
//! only through direct store manipulation, never through the RPC surface, so
//! `wire::Phase -> store::Phase` is infallible while the reverse direction
//! can fail.

use chrono::{DateTime, TimeZone, Utc};
use fleetops_types as ft;

use crate::error::{ConvertError, ConvertResult};
use crate::pb;

pub(crate) fn to_timestamp(dt: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

pub(crate) fn from_timestamp(ts: prost_types::Timestamp) -> ConvertResult<DateTime<Utc>> {
    Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32)
        .single()
        .ok_or(ConvertError::MissingField("timestamp"))
}

fn to_timestamp_opt(dt: Option<DateTime<Utc>>) -> Option<prost_types::Timestamp> {
    dt.map(to_timestamp)
}

fn from_timestamp_opt(ts: Option<prost_types::Timestamp>) -> ConvertResult<Option<DateTime<Utc>>> {
    ts.map(from_timestamp).transpose()
}

// ============================================================================
// Phase / EffectiveState
// ============================================================================

impl From<pb::Phase> for ft::Phase {
    fn from(value: pb::Phase) -> Self {
        match value {
            pb::Phase::FactoryReady | pb::Phase::Unspecified => ft::Phase::FactoryReady,
            pb::Phase::Ready => ft::Phase::Ready,
            pb::Phase::Maintenance => ft::Phase::Maintenance,
        }
    }
}

impl TryFrom<ft::Phase> for pb::Phase {
    type Error = ConvertError;

    fn try_from(value: ft::Phase) -> Result<Self, Self::Error> {
        match value {
            ft::Phase::FactoryReady => Ok(pb::Phase::FactoryReady),
            ft::Phase::Ready => Ok(pb::Phase::Ready),
            ft::Phase::Maintenance => Ok(pb::Phase::Maintenance),
            ft::Phase::Rma | ft::Phase::Retired => Err(ConvertError::UnrepresentablePhase(value)),
        }
    }
}

impl From<ft::EffectiveState> for pb::EffectiveState {
    fn from(value: ft::EffectiveState) -> Self {
        match value {
            ft::EffectiveState::FactoryReady => pb::EffectiveState::FactoryReady,
            ft::EffectiveState::Ready => pb::EffectiveState::Ready,
            ft::EffectiveState::Maintenance => pb::EffectiveState::Maintenance,
            ft::EffectiveState::Rma => pb::EffectiveState::Rma,
            ft::EffectiveState::Retired => pb::EffectiveState::Retired,
            ft::EffectiveState::InService => pb::EffectiveState::InService,
            ft::EffectiveState::Provisioning => pb::EffectiveState::Provisioning,
        }
    }
}

// ============================================================================
// OperationType / OperationPhase
// ============================================================================

impl From<ft::OperationType> for pb::OperationType {
    fn from(value: ft::OperationType) -> Self {
        match value {
            ft::OperationType::Reboot => pb::OperationType::Reboot,
            ft::OperationType::Reimage => pb::OperationType::Reimage,
            ft::OperationType::EnterMaintenance => pb::OperationType::EnterMaintenance,
            ft::OperationType::ExitMaintenance => pb::OperationType::ExitMaintenance,
        }
    }
}

impl TryFrom<pb::OperationType> for ft::OperationType {
    type Error = ConvertError;

    fn try_from(value: pb::OperationType) -> Result<Self, Self::Error> {
        match value {
            pb::OperationType::Reboot => Ok(ft::OperationType::Reboot),
            pb::OperationType::Reimage => Ok(ft::OperationType::Reimage),
            pb::OperationType::EnterMaintenance => Ok(ft::OperationType::EnterMaintenance),
            pb::OperationType::ExitMaintenance => Ok(ft::OperationType::ExitMaintenance),
            pb::OperationType::Unspecified => Err(ConvertError::UnknownEnumValue(0, "OperationType")),
        }
    }
}

impl From<ft::OperationPhase> for pb::OperationPhase {
    fn from(value: ft::OperationPhase) -> Self {
        match value {
            ft::OperationPhase::Pending => pb::OperationPhase::Pending,
            ft::OperationPhase::Running => pb::OperationPhase::Running,
            ft::OperationPhase::Succeeded => pb::OperationPhase::Succeeded,
            ft::OperationPhase::Failed => pb::OperationPhase::Failed,
            ft::OperationPhase::Canceled => pb::OperationPhase::Canceled,
        }
    }
}

impl TryFrom<pb::OperationPhase> for ft::OperationPhase {
    type Error = ConvertError;

    fn try_from(value: pb::OperationPhase) -> Result<Self, Self::Error> {
        match value {
            pb::OperationPhase::Pending => Ok(ft::OperationPhase::Pending),
            pb::OperationPhase::Running => Ok(ft::OperationPhase::Running),
            pb::OperationPhase::Succeeded => Ok(ft::OperationPhase::Succeeded),
            pb::OperationPhase::Failed => Ok(ft::OperationPhase::Failed),
            pb::OperationPhase::Canceled => Ok(ft::OperationPhase::Canceled),
            pb::OperationPhase::Unspecified => Err(ConvertError::UnknownEnumValue(0, "OperationPhase")),
        }
    }
}

// ============================================================================
// Condition / TargetCluster / MachineSpec
// ============================================================================

impl From<&ft::Condition> for pb::Condition {
    fn from(c: &ft::Condition) -> Self {
        pb::Condition {
            r#type: c.type_.clone(),
            status: c.status,
            reason: c.reason.clone(),
            message: c.message.clone(),
            last_transition: Some(to_timestamp(c.last_transition)),
        }
    }
}

impl TryFrom<pb::Condition> for ft::Condition {
    type Error = ConvertError;

    fn try_from(c: pb::Condition) -> Result<Self, Self::Error> {
        Ok(ft::Condition {
            type_: c.r#type,
            status: c.status,
            reason: c.reason,
            message: c.message,
            last_transition: from_timestamp_opt(c.last_transition)?.unwrap_or_else(Utc::now),
        })
    }
}

impl From<&ft::TargetCluster> for pb::TargetCluster {
    fn from(t: &ft::TargetCluster) -> Self {
        pb::TargetCluster {
            cluster_id: t.cluster_id.clone(),
        }
    }
}

impl From<pb::TargetCluster> for ft::TargetCluster {
    fn from(t: pb::TargetCluster) -> Self {
        ft::TargetCluster { cluster_id: t.cluster_id }
    }
}

impl From<&ft::MachineSpec> for pb::MachineSpec {
    fn from(spec: &ft::MachineSpec) -> Self {
        pb::MachineSpec {
            ssh_endpoint: spec.ssh_endpoint.clone().unwrap_or_default(),
            bmc_endpoint: spec.bmc_endpoint.clone().unwrap_or_default(),
            provider: spec.provider.clone().unwrap_or_default(),
            mac_addresses: spec.mac_addresses.clone(),
            target_cluster: spec.target_cluster.as_ref().map(pb::TargetCluster::from),
        }
    }
}

impl From<pb::MachineSpec> for ft::MachineSpec {
    fn from(spec: pb::MachineSpec) -> Self {
        ft::MachineSpec {
            ssh_endpoint: (!spec.ssh_endpoint.is_empty()).then_some(spec.ssh_endpoint),
            bmc_endpoint: (!spec.bmc_endpoint.is_empty()).then_some(spec.bmc_endpoint),
            provider: (!spec.provider.is_empty()).then_some(spec.provider),
            mac_addresses: spec.mac_addresses,
            target_cluster: spec.target_cluster.map(ft::TargetCluster::from),
        }
    }
}

// ============================================================================
// Machine
// ============================================================================

/// Builds the wire `Machine`, populating `effective_state` from the
/// separately-derived value (never stored alongside `MachineStatus`).
pub fn machine_to_pb(machine: &ft::Machine, effective_state: ft::EffectiveState) -> ConvertResult<pb::Machine> {
    Ok(pb::Machine {
        machine_id: machine.machine_id.to_string(),
        labels: machine.labels.clone(),
        spec: Some(pb::MachineSpec::from(&machine.spec)),
        status: Some(pb::MachineStatus {
            phase: pb::Phase::try_from(machine.status.phase)? as i32,
            effective_state: pb::EffectiveState::from(effective_state) as i32,
            active_operation_id: machine
                .status
                .active_operation_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            conditions: machine.status.conditions.iter().map(pb::Condition::from).collect(),
        }),
    })
}

/// Builds a machine for registration. `status` is server-owned (§3): any
/// caller-supplied value on the wire is dropped entirely rather than
/// trusted, the same way `Machine::new()` always starts from a fresh
/// default status.
pub fn machine_from_pb(m: pb::Machine) -> ConvertResult<ft::Machine> {
    Ok(ft::Machine {
        machine_id: ft::MachineId::new(m.machine_id),
        spec: m.spec.map(ft::MachineSpec::from).unwrap_or_default(),
        labels: m.labels,
        status: ft::MachineStatus::default(),
    })
}

// ============================================================================
// Operation
// ============================================================================

impl From<&ft::OperationError> for pb::OperationError {
    fn from(e: &ft::OperationError) -> Self {
        pb::OperationError {
            code: e.code.clone(),
            message: e.message.clone(),
            retryable: e.retryable,
            step_name: e.step_name.clone().unwrap_or_default(),
        }
    }
}

impl From<pb::OperationError> for ft::OperationError {
    fn from(e: pb::OperationError) -> Self {
        ft::OperationError {
            code: e.code,
            message: e.message,
            retryable: e.retryable,
            step_name: (!e.step_name.is_empty()).then_some(e.step_name),
        }
    }
}

/// Builds the wire `Operation`. Callers are expected to pass an already
/// [`ft::Operation::sanitized`] record — this function has no `plan_id`/
/// `steps` fields to populate in the first place, so sanitization is not
/// re-enforced here.
pub fn operation_to_pb(op: &ft::Operation) -> pb::Operation {
    pb::Operation {
        operation_id: op.operation_id.to_string(),
        machine_id: op.machine_id.to_string(),
        request_id: op.request_id.clone(),
        r#type: pb::OperationType::from(op.type_) as i32,
        phase: pb::OperationPhase::from(op.phase) as i32,
        params: op.params.clone(),
        error: op.error.as_ref().map(pb::OperationError::from),
        created_at: Some(to_timestamp(op.created_at)),
        started_at: to_timestamp_opt(op.started_at),
        finished_at: to_timestamp_opt(op.finished_at),
    }
}

pub fn operation_from_pb(op: pb::Operation) -> ConvertResult<ft::Operation> {
    let type_ = ft::OperationType::try_from(
        pb::OperationType::try_from(op.r#type).map_err(|_| ConvertError::UnknownEnumValue(op.r#type, "OperationType"))?,
    )?;
    let phase = ft::OperationPhase::try_from(
        pb::OperationPhase::try_from(op.phase).map_err(|_| ConvertError::UnknownEnumValue(op.phase, "OperationPhase"))?,
    )?;

    Ok(ft::Operation {
        operation_id: ft::OperationId::new(op.operation_id),
        machine_id: ft::MachineId::new(op.machine_id),
        request_id: op.request_id,
        type_,
        params: op.params,
        phase,
        error: op.error.map(ft::OperationError::from),
        created_at: from_timestamp_opt(op.created_at)?.unwrap_or_else(Utc::now),
        started_at: from_timestamp_opt(op.started_at)?,
        finished_at: from_timestamp_opt(op.finished_at)?,
        plan_id: String::new(),
        steps: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn phase_roundtrips_for_rpc_facing_variants() {
        for phase in [ft::Phase::FactoryReady, ft::Phase::Ready, ft::Phase::Maintenance] {
            let wire = pb::Phase::try_from(phase).unwrap();
            assert_eq!(ft::Phase::from(wire), phase);
        }
    }

    #[test]
    fn rma_and_retired_are_not_representable_on_the_wire() {
        assert!(pb::Phase::try_from(ft::Phase::Rma).is_err());
        assert!(pb::Phase::try_from(ft::Phase::Retired).is_err());
    }

    #[test]
    fn operation_roundtrips_through_wire_conversion() {
        let op = ft::Operation {
            operation_id: ft::OperationId::new("op-1"),
            machine_id: ft::MachineId::new("m-1"),
            request_id: "req-1".into(),
            type_: ft::OperationType::Reboot,
            params: HashMap::new(),
            phase: ft::OperationPhase::Succeeded,
            error: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            plan_id: "plan/reboot".into(),
            steps: vec![],
        };

        let wire = operation_to_pb(&op);
        let back = operation_from_pb(wire).unwrap();
        assert_eq!(back.operation_id, op.operation_id);
        assert_eq!(back.phase, op.phase);
        assert!(back.plan_id.is_empty());
    }

    #[test]
    fn machine_conversion_carries_effective_state_without_storing_it() {
        let machine = ft::Machine::new(ft::MachineSpec::default(), HashMap::new());
        let wire = machine_to_pb(&machine, ft::EffectiveState::FactoryReady).unwrap();
        assert_eq!(wire.status.unwrap().effective_state, pb::EffectiveState::FactoryReady as i32);

        let back = machine_from_pb(wire_with_status(&machine)).unwrap();
        assert_eq!(back.machine_id, machine.machine_id);
    }

    fn wire_with_status(machine: &ft::Machine) -> pb::Machine {
        machine_to_pb(machine, ft::EffectiveState::FactoryReady).unwrap()
    }
}
