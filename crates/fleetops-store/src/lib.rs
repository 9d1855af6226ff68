//! In-memory, thread-safe store of machines and operations.
//!
//! A single reader/writer lock protects the machine map, operation map,
//! idempotency index, and per-machine `operating` flags. A per-machine mutex
//! serializes the create-operation critical section without blocking work on
//! unrelated machines — see [`Store::create_operation_if_not_exists`] for the
//! fetch-lock-recheck discipline this requires.
//!
//! Every value that leaves this module is a deep clone; nothing here hands
//! out a reference that could outlive its lock guard.

pub mod error;
pub mod lifecycle;
pub mod plan;

pub use error::{StoreError, StoreResult};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fleetops_types::{
    EffectiveState, Machine, MachineId, MachineSpec, MachineStatus, Operation, OperationError,
    OperationId, OperationPhase, OperationType, StepStatus,
};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Default)]
struct Inner {
    machines: HashMap<MachineId, Machine>,
    operations: HashMap<OperationId, Operation>,
    idempotency_index: HashMap<(MachineId, String), OperationId>,
    machine_locks: HashMap<MachineId, Arc<Mutex<()>>>,
    operating: HashMap<MachineId, bool>,
}

/// The fleet control plane's single source of truth for machines and
/// operations.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `machine_id` if empty, ensures a per-machine mutex exists, and
    /// stores a deep clone. A pre-existing machine is replaced by id.
    pub async fn upsert_machine(&self, mut machine: Machine) -> Machine {
        if machine.machine_id.is_empty() {
            machine.machine_id = MachineId::generate();
        }
        let mut inner = self.inner.write().await;
        inner
            .machine_locks
            .entry(machine.machine_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        inner.machines.insert(machine.machine_id.clone(), machine.clone());
        machine
    }

    pub async fn get_machine(&self, id: &MachineId) -> StoreResult<Machine> {
        let inner = self.inner.read().await;
        inner
            .machines
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::MachineNotFound(id.clone()))
    }

    pub async fn list_machines(&self) -> Vec<Machine> {
        let inner = self.inner.read().await;
        inner.machines.values().cloned().collect()
    }

    /// Merges whichever of `spec`/`status`/`labels` is `Some` into the
    /// existing record. Fails if the machine does not exist. Callers decide
    /// which fields a given caller is allowed to set — this method applies
    /// whatever it is handed.
    pub async fn update_machine(
        &self,
        id: &MachineId,
        spec: Option<MachineSpec>,
        status: Option<MachineStatus>,
        labels: Option<HashMap<String, String>>,
    ) -> StoreResult<Machine> {
        let mut inner = self.inner.write().await;
        let machine = inner
            .machines
            .get_mut(id)
            .ok_or_else(|| StoreError::MachineNotFound(id.clone()))?;
        if let Some(spec) = spec {
            machine.spec = spec;
        }
        if let Some(status) = status {
            machine.status = status;
        }
        if let Some(labels) = labels {
            machine.labels = labels;
        }
        Ok(machine.clone())
    }

    /// Applies an in-place mutation to a machine's record and returns the
    /// resulting clone. Used by the executor to apply lifecycle helpers
    /// ([`lifecycle::set_condition`], [`lifecycle::set_machine_phase`])
    /// without duplicating the lock dance at every call site.
    pub async fn mutate_machine<F>(&self, id: &MachineId, f: F) -> StoreResult<Machine>
    where
        F: FnOnce(&mut Machine),
    {
        let mut inner = self.inner.write().await;
        let machine = inner
            .machines
            .get_mut(id)
            .ok_or_else(|| StoreError::MachineNotFound(id.clone()))?;
        f(machine);
        Ok(machine.clone())
    }

    /// Computes [`EffectiveState`] for a machine from its current status and
    /// active operation, if any. Never stored — always derived on read.
    pub async fn effective_state(&self, id: &MachineId) -> StoreResult<EffectiveState> {
        let inner = self.inner.read().await;
        let machine = inner
            .machines
            .get(id)
            .ok_or_else(|| StoreError::MachineNotFound(id.clone()))?;
        let active_op = machine
            .status
            .active_operation_id
            .as_ref()
            .and_then(|op_id| inner.operations.get(op_id));
        Ok(lifecycle::effective_state(machine, active_op))
    }

    /// Idempotently creates an operation scoped to `(machine_id, request_id)`.
    ///
    /// Fast path (read lock only): if the `(machine_id, request_id)` pair is
    /// already indexed, returns the existing operation with `created=false`
    /// — this succeeds even while that operation is still active. Otherwise
    /// takes the per-machine mutex, re-checks the index under the write lock
    /// (someone else may have raced us into the mutex), re-fetches the
    /// machine (a concurrent [`Store::upsert_machine`] may have replaced
    /// it), and fails with [`StoreError::MachineHasActiveOperation`] if the
    /// machine already has a *different* active operation.
    pub async fn create_operation_if_not_exists(
        &self,
        machine_id: &MachineId,
        request_id: &str,
        op_type: OperationType,
        plan_id: &str,
        params: HashMap<String, String>,
    ) -> StoreResult<(Operation, bool)> {
        let key = (machine_id.clone(), request_id.to_string());

        if !request_id.is_empty() {
            let inner = self.inner.read().await;
            if let Some(existing) = self.lookup_indexed(&inner, &key) {
                return Ok((existing, false));
            }
        }

        let machine_lock = {
            let inner = self.inner.read().await;
            inner
                .machine_locks
                .get(machine_id)
                .cloned()
                .ok_or_else(|| StoreError::MachineNotFound(machine_id.clone()))?
        };
        let _guard = machine_lock.lock().await;

        let mut inner = self.inner.write().await;

        if !request_id.is_empty() {
            if let Some(existing) = self.lookup_indexed(&inner, &key) {
                return Ok((existing, false));
            }
        }

        if !inner.machines.contains_key(machine_id) {
            return Err(StoreError::MachineNotFound(machine_id.clone()));
        }

        if inner.operating.get(machine_id).copied().unwrap_or(false) {
            let active_operation_id = inner
                .machines
                .get(machine_id)
                .and_then(|m| m.status.active_operation_id.clone())
                .unwrap_or_else(|| OperationId::new(""));
            return Err(StoreError::MachineHasActiveOperation {
                machine_id: machine_id.clone(),
                active_operation_id,
            });
        }

        let operation_id = OperationId::generate();
        let operation = Operation {
            operation_id: operation_id.clone(),
            machine_id: machine_id.clone(),
            request_id: request_id.to_string(),
            type_: op_type,
            params,
            phase: OperationPhase::Pending,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            plan_id: plan_id.to_string(),
            steps: vec![],
        };

        inner.operations.insert(operation_id.clone(), operation.clone());
        if !request_id.is_empty() {
            inner.idempotency_index.insert(key, operation_id.clone());
        }
        inner.operating.insert(machine_id.clone(), true);
        if let Some(machine) = inner.machines.get_mut(machine_id) {
            machine.status.active_operation_id = Some(operation_id);
        }

        Ok((operation, true))
    }

    fn lookup_indexed(&self, inner: &Inner, key: &(MachineId, String)) -> Option<Operation> {
        let op_id = inner.idempotency_index.get(key)?;
        inner.operations.get(op_id).cloned()
    }

    /// Atomic compare-and-set on operation phase. `swapped=false` (not an
    /// error) if the current phase does not match `from`. Sets `started_at`
    /// on first entry into RUNNING and `finished_at` on any terminal
    /// transition.
    pub async fn try_transition_operation_phase(
        &self,
        op_id: &OperationId,
        from: OperationPhase,
        to: OperationPhase,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let op = inner
            .operations
            .get_mut(op_id)
            .ok_or_else(|| StoreError::OperationNotFound(op_id.clone()))?;
        if op.phase != from {
            return Ok(false);
        }
        op.phase = to;
        let now = Utc::now();
        if to == OperationPhase::Running && op.started_at.is_none() {
            op.started_at = Some(now);
        }
        if to.is_terminal() {
            op.finished_at = Some(now);
        }
        Ok(true)
    }

    /// Replaces or appends a step status by name, preserving `started_at`
    /// when the incoming record doesn't carry one — retry/finish updates
    /// only ever set `state`/`retry_count`/`message`/`finished_at` and
    /// would otherwise wipe the timestamp `begin_step` recorded. Clones the
    /// input so the caller cannot mutate stored state after the fact.
    pub async fn update_workflow_step(&self, op_id: &OperationId, mut step: StepStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let op = inner
            .operations
            .get_mut(op_id)
            .ok_or_else(|| StoreError::OperationNotFound(op_id.clone()))?;
        if let Some(existing) = op.steps.iter_mut().find(|s| s.name == step.name) {
            if step.started_at.is_none() {
                step.started_at = existing.started_at;
            }
            *existing = step;
        } else {
            op.steps.push(step);
        }
        Ok(())
    }

    /// Sets the operation's terminal phase and `finished_at`, clears the
    /// machine's `active_operation_id` and `operating` flag. Does not touch
    /// machine phase — that is the executor's call, applied separately via
    /// [`Store::mutate_machine`].
    pub async fn complete_operation(
        &self,
        op_id: &OperationId,
        terminal_phase: OperationPhase,
        error: Option<OperationError>,
    ) -> StoreResult<Operation> {
        let mut inner = self.inner.write().await;
        let machine_id = {
            let op = inner
                .operations
                .get_mut(op_id)
                .ok_or_else(|| StoreError::OperationNotFound(op_id.clone()))?;
            op.phase = terminal_phase;
            op.finished_at = Some(Utc::now());
            if error.is_some() {
                op.error = error;
            }
            op.machine_id.clone()
        };
        inner.operating.insert(machine_id.clone(), false);
        if let Some(machine) = inner.machines.get_mut(&machine_id) {
            machine.status.active_operation_id = None;
        }
        Ok(inner.operations.get(op_id).expect("just inserted").clone())
    }

    /// Idempotent: a second cancel on an already-CANCELED operation returns
    /// success with `transitioned=false`. Fails with
    /// [`StoreError::OperationAlreadyFinished`] if the operation is
    /// SUCCEEDED or FAILED. The `transitioned` flag lets a caller that races
    /// with another canceler (e.g. the executor's own cancellation-token
    /// check) skip redundant condition-setting and event emission.
    pub async fn cancel_operation(&self, op_id: &OperationId) -> StoreResult<(Operation, bool)> {
        let mut inner = self.inner.write().await;
        let (phase, machine_id) = {
            let op = inner
                .operations
                .get(op_id)
                .ok_or_else(|| StoreError::OperationNotFound(op_id.clone()))?;
            (op.phase, op.machine_id.clone())
        };

        if phase == OperationPhase::Canceled {
            return Ok((inner.operations.get(op_id).expect("checked above").clone(), false));
        }
        if phase.is_terminal() {
            return Err(StoreError::OperationAlreadyFinished(op_id.clone()));
        }

        let op = inner.operations.get_mut(op_id).expect("checked above");
        op.phase = OperationPhase::Canceled;
        op.finished_at = Some(Utc::now());

        inner.operating.insert(machine_id.clone(), false);
        if let Some(machine) = inner.machines.get_mut(&machine_id) {
            machine.status.active_operation_id = None;
        }
        Ok((inner.operations.get(op_id).expect("checked above").clone(), true))
    }

    pub async fn get_operation(&self, id: &OperationId) -> StoreResult<Operation> {
        let inner = self.inner.read().await;
        inner
            .operations
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::OperationNotFound(id.clone()))
    }

    /// Lists operations, optionally filtered to a single machine.
    pub async fn list_operations(&self, machine_id: Option<&MachineId>) -> Vec<Operation> {
        let inner = self.inner.read().await;
        inner
            .operations
            .values()
            .filter(|op| machine_id.map_or(true, |id| &op.machine_id == id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn new_machine() -> Machine {
        Machine::new(MachineSpec::default(), HashMap::new())
    }

    #[tokio::test]
    async fn upsert_assigns_id_when_empty() {
        let store = Store::new();
        let machine = Machine {
            machine_id: MachineId::new(""),
            ..new_machine()
        };
        let stored = store.upsert_machine(machine).await;
        assert!(!stored.machine_id.is_empty());
        assert_eq!(store.get_machine(&stored.machine_id).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn get_machine_not_found() {
        let store = Store::new();
        let err = store.get_machine(&MachineId::new("missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn create_operation_is_idempotent_by_request_id() {
        let store = Store::new();
        let machine = store.upsert_machine(new_machine()).await;

        let (op1, created1) = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-1",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap();
        assert!(created1);

        let (op2, created2) = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-1",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap();
        assert!(!created2);
        assert_eq!(op1.operation_id, op2.operation_id);
    }

    #[tokio::test]
    async fn create_operation_fails_when_machine_already_has_different_active_operation() {
        let store = Store::new();
        let machine = store.upsert_machine(new_machine()).await;

        store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-a",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap();

        let err = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-b",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_active_operation_conflict());
    }

    #[tokio::test]
    async fn completing_an_operation_clears_active_operation_id() {
        let store = Store::new();
        let machine = store.upsert_machine(new_machine()).await;
        let (op, _) = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-1",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap();

        store
            .complete_operation(&op.operation_id, OperationPhase::Succeeded, None)
            .await
            .unwrap();

        let machine_after = store.get_machine(&machine.machine_id).await.unwrap();
        assert!(machine_after.status.active_operation_id.is_none());

        // A brand new request can now create a new active operation.
        let (_, created) = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-2",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_rejects_terminal_operations() {
        let store = Store::new();
        let machine = store.upsert_machine(new_machine()).await;
        let (op, _) = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-1",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap();

        let (canceled, transitioned) = store.cancel_operation(&op.operation_id).await.unwrap();
        assert_eq!(canceled.phase, OperationPhase::Canceled);
        assert!(transitioned);

        let (canceled_again, transitioned_again) = store.cancel_operation(&op.operation_id).await.unwrap();
        assert_eq!(canceled_again.phase, OperationPhase::Canceled);
        assert!(!transitioned_again);

        let (op2, _) = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-2",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap();
        store
            .complete_operation(&op2.operation_id, OperationPhase::Succeeded, None)
            .await
            .unwrap();
        let err = store.cancel_operation(&op2.operation_id).await.unwrap_err();
        assert!(err.is_already_finished());
    }

    #[tokio::test]
    async fn try_transition_phase_sets_started_and_finished_timestamps() {
        let store = Store::new();
        let machine = store.upsert_machine(new_machine()).await;
        let (op, _) = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-1",
                OperationType::Reboot,
                "plan/reboot",
                HashMap::new(),
            )
            .await
            .unwrap();

        let swapped = store
            .try_transition_operation_phase(&op.operation_id, OperationPhase::Pending, OperationPhase::Running)
            .await
            .unwrap();
        assert!(swapped);

        let running = store.get_operation(&op.operation_id).await.unwrap();
        assert!(running.started_at.is_some());

        // A mismatched `from` is a no-op, not an error.
        let not_swapped = store
            .try_transition_operation_phase(&op.operation_id, OperationPhase::Pending, OperationPhase::Running)
            .await
            .unwrap();
        assert!(!not_swapped);
    }

    #[tokio::test]
    async fn list_operations_filters_by_machine() {
        let store = Store::new();
        let m1 = store.upsert_machine(new_machine()).await;
        let m2 = store.upsert_machine(new_machine()).await;
        store
            .create_operation_if_not_exists(&m1.machine_id, "r1", OperationType::Reboot, "plan/reboot", HashMap::new())
            .await
            .unwrap();
        store
            .create_operation_if_not_exists(&m2.machine_id, "r2", OperationType::Reboot, "plan/reboot", HashMap::new())
            .await
            .unwrap();

        let all = store.list_operations(None).await;
        assert_eq!(all.len(), 2);
        let for_m1 = store.list_operations(Some(&m1.machine_id)).await;
        assert_eq!(for_m1.len(), 1);
        assert_eq!(for_m1[0].machine_id, m1.machine_id);
    }
}
