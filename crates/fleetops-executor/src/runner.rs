//! The step runner: drives PENDING operations to a terminal phase against a
//! [`Provider`], retrying failed steps with backoff and publishing progress
//! to subscribers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetops_provider::{LogSink, LogStream, Provider, ProviderContext};
use fleetops_store::plan::PlanRegistry;
use fleetops_store::Store;
use fleetops_types::{
    condition_types, Machine, Operation, OperationError, OperationId, OperationPhase, OperationType,
    Phase, StepKind, StepState, StepStatus,
};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutorResult;
use crate::events::{EventBus, LogBus, LogChunk, OperationEvent};

/// Exponential backoff parameters for step retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub base_retry_wait: Duration,
    pub max_retry_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_retry_wait: Duration::from_millis(500),
            max_retry_wait: Duration::from_secs(10),
        }
    }
}

/// `delay(attempt) = min(max_retry_wait, base_retry_wait * 2^attempt)`.
fn backoff_delay(attempt: u32, config: RetryConfig) -> Duration {
    config
        .base_retry_wait
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .min(config.max_retry_wait)
}

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Drives operations through their plan's steps against a [`Provider`].
///
/// One tokio task runs per in-flight operation; the store enforces at most
/// one active operation per machine, so concurrency across machines is
/// unbounded while per-machine execution stays serialized.
pub struct Runner<P> {
    store: Arc<Store>,
    provider: Arc<P>,
    plans: Arc<PlanRegistry>,
    retry: RetryConfig,
    parent_token: CancellationToken,
    active_operations: Mutex<HashMap<OperationId, CancellationToken>>,
    event_bus: Arc<EventBus<OperationEvent>>,
    log_bus: Arc<LogBus>,
}

impl<P: Provider + 'static> Runner<P> {
    pub fn new(store: Arc<Store>, provider: Arc<P>, plans: Arc<PlanRegistry>, retry: RetryConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            provider,
            plans,
            retry,
            parent_token: CancellationToken::new(),
            active_operations: Mutex::new(HashMap::new()),
            event_bus: EventBus::new(),
            log_bus: LogBus::new(),
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus<OperationEvent>> {
        self.event_bus.clone()
    }

    pub fn log_bus(&self) -> Arc<LogBus> {
        self.log_bus.clone()
    }

    /// Attempts PENDING→RUNNING for `op_id`; on success, spawns the
    /// execution task under a child of the runner's long-lived operation
    /// token. If the transition does not happen (already RUNNING/terminal,
    /// or started by a concurrent caller) this is a no-op success.
    pub async fn start_operation(self: &Arc<Self>, op_id: OperationId) -> ExecutorResult<()> {
        let swapped = self
            .store
            .try_transition_operation_phase(&op_id, OperationPhase::Pending, OperationPhase::Running)
            .await?;
        if !swapped {
            return Ok(());
        }

        let token = self.parent_token.child_token();
        self.active_operations.lock().await.insert(op_id.clone(), token.clone());

        let runner = self.clone();
        let exec_op_id = op_id.clone();
        let exec_token = token.clone();
        let handle = tokio::spawn(async move { runner.execute(exec_op_id, exec_token).await });

        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(join_err) = handle.await {
                if join_err.is_panic() {
                    runner.handle_panic(&op_id, "task join error (panic)".to_string()).await;
                }
            }
            runner.active_operations.lock().await.remove(&op_id);
        });

        Ok(())
    }

    /// Cancels an in-flight or pending operation. Idempotent: canceling an
    /// already-CANCELED operation returns success; canceling a
    /// SUCCEEDED/FAILED one returns [`fleetops_store::StoreError::OperationAlreadyFinished`].
    pub async fn cancel_operation(&self, op_id: &OperationId) -> ExecutorResult<Operation> {
        let (operation, transitioned) = self.store.cancel_operation(op_id).await?;
        if transitioned {
            self.finish_cancel(&operation, "UserCanceled").await;
        }
        if let Some(token) = self.active_operations.lock().await.get(op_id) {
            token.cancel();
        }
        Ok(operation)
    }

    /// Cancels every tracked operation's token. Called once by the service
    /// shell during graceful shutdown, before it stops accepting new RPCs.
    pub async fn shutdown(&self) {
        self.parent_token.cancel();
    }

    async fn execute(self: Arc<Self>, op_id: OperationId, token: CancellationToken) {
        let outcome = AssertUnwindSafe(self.clone().run_steps(op_id.clone(), token)).catch_unwind().await;
        if let Err(panic_payload) = outcome {
            let message = panic_message(&panic_payload);
            self.handle_panic(&op_id, message).await;
        }
        self.log_bus.cleanup(&op_id).await;
    }

    async fn run_steps(self: Arc<Self>, op_id: OperationId, token: CancellationToken) {
        let Ok(operation) = self.store.get_operation(&op_id).await else {
            tracing::error!(%op_id, "operation vanished before execution began");
            return;
        };
        let Ok(machine) = self.store.get_machine(&operation.machine_id).await else {
            tracing::error!(%op_id, "machine vanished before execution began");
            return;
        };
        let Some(plan) = self.plans.get(&operation.plan_id) else {
            self.fail_operation(&op_id, &machine, format!("no plan registered: {}", operation.plan_id), None)
                .await;
            return;
        };

        let mut repave_ran = false;

        for step in &plan.steps {
            if token.is_cancelled() {
                self.finish_cancel_by_id(&op_id, "Canceled").await;
                return;
            }

            self.begin_step(&op_id, &step.name).await;

            let max_attempts = 1 + step.max_retries;
            let mut attempt = 0u32;
            let mut last_message = String::new();
            let mut succeeded = false;

            while attempt < max_attempts {
                if attempt > 0 {
                    let delay = backoff_delay(attempt, self.retry);
                    if !sleep_cancellable(delay, &token).await {
                        self.finish_cancel_by_id(&op_id, "Canceled").await;
                        return;
                    }
                }
                if token.is_cancelled() {
                    self.finish_cancel_by_id(&op_id, "Canceled").await;
                    return;
                }

                let timeout_dur = if step.timeout_seconds == 0 {
                    DEFAULT_STEP_TIMEOUT
                } else {
                    Duration::from_secs(step.timeout_seconds)
                };

                let dispatch = tokio::time::timeout(
                    timeout_dur,
                    self.dispatch_step(&op_id, &machine, &operation, &step.kind, &token),
                )
                .await;

                match dispatch {
                    Ok(Ok(())) => {
                        succeeded = true;
                        if matches!(step.kind, StepKind::RepaveImage { .. }) {
                            repave_ran = true;
                        }
                        break;
                    }
                    Ok(Err(provider_err)) => {
                        last_message = provider_err.to_string();
                        attempt += 1;
                        self.record_retry(&op_id, &step.name, attempt, &last_message).await;
                    }
                    Err(_elapsed) => {
                        last_message = format!("step `{}` timed out after {}s", step.name, timeout_dur.as_secs());
                        attempt += 1;
                        self.record_retry(&op_id, &step.name, attempt, &last_message).await;
                    }
                }
            }

            if succeeded {
                self.finish_step_success(&op_id, &step.name).await;
            } else {
                self.finish_step_failure(&op_id, &step.name, &last_message).await;
                self.fail_operation(&op_id, &machine, last_message, Some(step.name.clone())).await;
                return;
            }
        }

        self.succeed_operation(&op_id, operation.type_, &machine, repave_ran).await;
    }

    async fn dispatch_step(
        &self,
        op_id: &OperationId,
        machine: &Machine,
        operation: &Operation,
        kind: &StepKind,
        token: &CancellationToken,
    ) -> fleetops_provider::ProviderResult<()> {
        let ctx = ProviderContext {
            operation_id: op_id.clone(),
            machine: machine.clone(),
            cancellation: token.clone(),
            log_sink: Arc::new(RunnerLogSink {
                log_bus: self.log_bus.clone(),
            }),
        };

        match kind {
            StepKind::SshCommand { script_ref, args } => {
                self.provider.execute_ssh_command(&ctx, script_ref, args).await
            }
            StepKind::Reboot { force } => self.provider.reboot(&ctx, *force).await,
            StepKind::SetNetboot { profile } => self.provider.set_netboot(&ctx, profile).await,
            StepKind::RepaveImage {
                image_ref,
                cloud_init_ref,
            } => {
                // The plan catalogue ships these blank; a caller-supplied
                // operation param (e.g. ReimageMachine's `image_ref`) wins
                // over the plan's own literal when present.
                let image_ref = operation.params.get("image_ref").map_or(image_ref.as_str(), String::as_str);
                let cloud_init_ref = operation
                    .params
                    .get("cloud_init_ref")
                    .map_or(cloud_init_ref.as_str(), String::as_str);
                self.provider.repave(&ctx, image_ref, cloud_init_ref).await
            }
            StepKind::KubeadmJoin => {
                let target = machine.spec.target_cluster.clone().ok_or_else(|| {
                    fleetops_provider::ProviderError::Failed("machine has no target cluster configured".into())
                })?;
                let material = self.provider.mint_join_material(&ctx, &target).await?;
                self.provider.join_node(&ctx, &material).await
            }
            StepKind::VerifyInCluster => {
                let target = machine.spec.target_cluster.clone().ok_or_else(|| {
                    fleetops_provider::ProviderError::Failed("machine has no target cluster configured".into())
                })?;
                self.provider.verify_in_cluster(&ctx, &target).await
            }
            StepKind::NetReconfig { .. } => {
                ctx.log(LogStream::Stdout, "applying network reconfiguration".to_string());
                tokio::time::sleep(Duration::from_millis(50)).await;
                ctx.log(LogStream::Stdout, "network reconfiguration applied".to_string());
                Ok(())
            }
            StepKind::RmaAction { reason } => self.provider.rma(&ctx, reason).await,
        }
    }

    async fn begin_step(&self, op_id: &OperationId, name: &str) {
        let mut status = StepStatus::waiting(name);
        status.state = StepState::Running;
        status.started_at = Some(Utc::now());
        self.store.update_workflow_step(op_id, status).await.ok();
        self.emit_log(op_id, LogStream::Stdout, format!("=== starting step {name} ===\n"));
        self.publish_event(op_id, format!("starting step {name}")).await;
    }

    async fn record_retry(&self, op_id: &OperationId, name: &str, attempt: u32, message: &str) {
        let mut status = StepStatus::waiting(name);
        status.state = StepState::Running;
        status.retry_count = attempt;
        status.message = Some(message.to_string());
        self.store.update_workflow_step(op_id, status).await.ok();
        tracing::warn!(%op_id, step = name, attempt, %message, "step attempt failed, will retry if budget remains");
    }

    async fn finish_step_success(&self, op_id: &OperationId, name: &str) {
        let mut status = StepStatus::waiting(name);
        status.state = StepState::Succeeded;
        status.finished_at = Some(Utc::now());
        self.store.update_workflow_step(op_id, status).await.ok();
        tracing::info!(%op_id, step = name, "step succeeded");
        self.publish_event(op_id, format!("step {name} succeeded")).await;
    }

    async fn finish_step_failure(&self, op_id: &OperationId, name: &str, message: &str) {
        let mut status = StepStatus::waiting(name);
        status.state = StepState::Failed;
        status.finished_at = Some(Utc::now());
        status.message = Some(message.to_string());
        self.store.update_workflow_step(op_id, status).await.ok();
        tracing::error!(%op_id, step = name, %message, "step failed after exhausting retries");
    }

    async fn fail_operation(&self, op_id: &OperationId, machine: &Machine, message: String, step_name: Option<String>) {
        let error = OperationError::execution_failed(message, step_name.unwrap_or_default());
        if let Err(err) = self
            .store
            .complete_operation(op_id, OperationPhase::Failed, Some(error))
            .await
        {
            tracing::error!(%op_id, %err, "failed to mark operation FAILED in store");
        }
        if let Err(err) = self
            .store
            .mutate_machine(&machine.machine_id, |m| {
                fleetops_store::lifecycle::set_condition(
                    m,
                    condition_types::NEEDS_INTERVENTION,
                    true,
                    "OperationFailed",
                    "operation failed after exhausting its retry budget",
                );
            })
            .await
        {
            tracing::error!(%err, "failed to set NeedsIntervention condition");
        }
        self.emit_log(op_id, LogStream::Stderr, "operation failed\n".to_string());
        self.publish_event(op_id, "operation failed".to_string()).await;
    }

    async fn succeed_operation(&self, op_id: &OperationId, op_type: OperationType, machine: &Machine, repave_ran: bool) {
        if let Err(err) = self
            .store
            .complete_operation(op_id, OperationPhase::Succeeded, None)
            .await
        {
            tracing::error!(%op_id, %err, "failed to mark operation SUCCEEDED in store");
        }
        let mutated = self
            .store
            .mutate_machine(&machine.machine_id, |m| {
                fleetops_store::lifecycle::clear_condition(m, condition_types::NEEDS_INTERVENTION);
                fleetops_store::lifecycle::clear_condition(m, condition_types::OPERATION_CANCELED);
                match op_type {
                    OperationType::EnterMaintenance => {
                        fleetops_store::lifecycle::set_machine_phase(m, Phase::Maintenance);
                    }
                    OperationType::ExitMaintenance => {
                        fleetops_store::lifecycle::set_machine_phase(m, Phase::Ready);
                    }
                    OperationType::Reimage if repave_ran => {
                        fleetops_store::lifecycle::set_condition(
                            m,
                            condition_types::PROVISIONED,
                            true,
                            "Repaved",
                            "image repave step completed",
                        );
                        fleetops_store::lifecycle::set_condition(
                            m,
                            condition_types::IN_CUSTOMER_CLUSTER,
                            true,
                            "Joined",
                            "joined customer cluster",
                        );
                    }
                    OperationType::Reimage | OperationType::Reboot => {}
                }
            })
            .await;
        if let Err(err) = mutated {
            tracing::error!(%err, "failed to update machine conditions on success");
        }
        self.publish_event(op_id, "operation succeeded".to_string()).await;
    }

    async fn finish_cancel_by_id(&self, op_id: &OperationId, reason: &str) {
        match self.store.cancel_operation(op_id).await {
            Ok((operation, transitioned)) => {
                if transitioned {
                    self.finish_cancel(&operation, reason).await;
                }
            }
            Err(err) if err.is_already_finished() => {}
            Err(err) => tracing::error!(%op_id, %err, "failed to cancel operation in store"),
        }
    }

    async fn finish_cancel(&self, operation: &Operation, reason: &str) {
        if let Err(err) = self
            .store
            .mutate_machine(&operation.machine_id, |m| {
                fleetops_store::lifecycle::set_condition(
                    m,
                    condition_types::OPERATION_CANCELED,
                    true,
                    reason,
                    "operation was canceled",
                );
            })
            .await
        {
            tracing::error!(%err, "failed to set OperationCanceled condition");
        }
        self.emit_log(&operation.operation_id, LogStream::Stderr, "operation canceled\n".to_string());
        self.publish_event(&operation.operation_id, "operation canceled".to_string()).await;
    }

    async fn handle_panic(&self, op_id: &OperationId, message: String) {
        let error = OperationError::panic(message.clone());
        if let Err(err) = self
            .store
            .complete_operation(op_id, OperationPhase::Failed, Some(error))
            .await
        {
            tracing::error!(%op_id, %err, "failed to mark panicked operation FAILED in store");
        }
        if let Ok(operation) = self.store.get_operation(op_id).await {
            if let Err(err) = self
                .store
                .mutate_machine(&operation.machine_id, |m| {
                    fleetops_store::lifecycle::set_condition(
                        m,
                        condition_types::NEEDS_INTERVENTION,
                        true,
                        "Panic",
                        "execution task panicked",
                    );
                })
                .await
            {
                tracing::error!(%err, "failed to set NeedsIntervention condition after panic");
            }
        }
        self.emit_log(op_id, LogStream::Stderr, format!("recovered from panic: {message}\n"));
        tracing::error!(%op_id, %message, "operation execution task panicked, marked FAILED");
    }

    fn emit_log(&self, op_id: &OperationId, stream: LogStream, text: String) {
        let log_bus = self.log_bus.clone();
        let op_id = op_id.clone();
        tokio::spawn(async move {
            log_bus
                .publish(
                    &op_id,
                    LogChunk {
                        ts: Utc::now(),
                        operation_id: op_id.clone(),
                        stream,
                        data: text.into_bytes(),
                    },
                )
                .await;
        });
    }

    async fn publish_event(&self, op_id: &OperationId, message: String) {
        let Ok(snapshot) = self.store.get_operation(op_id).await else {
            return;
        };
        self.event_bus
            .publish(OperationEvent {
                ts: Utc::now(),
                snapshot,
                message,
            })
            .await;
    }
}

/// Sleeps for `delay`, honoring cancellation. Returns `false` if the token
/// fired before the sleep elapsed.
async fn sleep_cancellable(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = token.cancelled() => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct RunnerLogSink {
    log_bus: Arc<LogBus>,
}

impl LogSink for RunnerLogSink {
    fn emit(&self, operation_id: &OperationId, stream: LogStream, bytes: Vec<u8>) {
        let log_bus = self.log_bus.clone();
        let operation_id = operation_id.clone();
        tokio::spawn(async move {
            log_bus
                .publish(
                    &operation_id,
                    LogChunk {
                        ts: Utc::now(),
                        operation_id: operation_id.clone(),
                        stream,
                        data: bytes,
                    },
                )
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetops_provider::{FakeProvider, FakeProviderConfig};
    use fleetops_types::MachineSpec;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            base_retry_wait: Duration::from_millis(5),
            max_retry_wait: Duration::from_millis(20),
        }
    }

    async fn terminal_phase(store: &Store, op_id: &OperationId) -> OperationPhase {
        for _ in 0..500 {
            let op = store.get_operation(op_id).await.unwrap();
            if op.phase.is_terminal() {
                return op.phase;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("operation never reached a terminal phase");
    }

    async fn new_machine_and_runner(
        config: FakeProviderConfig,
    ) -> (Arc<Runner<FakeProvider>>, Arc<Store>, fleetops_types::Machine) {
        let store = Arc::new(Store::new());
        let machine = store
            .upsert_machine(Machine::new(MachineSpec::default(), HashMap::new()))
            .await;
        let plans = Arc::new(PlanRegistry::with_builtins());
        let provider = Arc::new(FakeProvider::with_config(config));
        let runner = Runner::new(store.clone(), provider, plans, fast_retry());
        (runner, store, machine)
    }

    #[tokio::test]
    async fn reboot_runs_to_success_and_starting_twice_is_a_no_op() {
        let (runner, store, machine) = new_machine_and_runner(FakeProviderConfig::default()).await;
        let (op, _) = store
            .create_operation_if_not_exists(
                &machine.machine_id,
                "req-1",
                OperationType::Reboot,
                PlanRegistry::default_plan_id(OperationType::Reboot),
                HashMap::new(),
            )
            .await
            .unwrap();

        runner.start_operation(op.operation_id.clone()).await.unwrap();
        // A second start_operation call on the now-RUNNING/terminal operation
        // must not re-run the already-submitted step.
        runner.start_operation(op.operation_id.clone()).await.unwrap();

        let phase = terminal_phase(&store, &op.operation_id).await;
        assert_eq!(phase, OperationPhase::Succeeded);

        let finished = store.get_operation(&op.operation_id).await.unwrap();
        assert_eq!(finished.steps.len(), 1);
        assert_eq!(finished.steps[0].state, StepState::Succeeded);
    }

    #[tokio::test]
    async fn canceling_mid_flight_marks_the_operation_canceled() {
        let config = FakeProviderConfig::default().with_delay("reboot", Duration::from_millis(200));
        let (runner, store, machine) = new_machine_and_runner(config).await;
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

        runner.start_operation(op.operation_id.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.cancel_operation(&op.operation_id).await.unwrap();

        let phase = terminal_phase(&store, &op.operation_id).await;
        assert_eq!(phase, OperationPhase::Canceled);

        let machine_after = store.get_machine(&machine.machine_id).await.unwrap();
        assert!(machine_after
            .status
            .condition(condition_types::OPERATION_CANCELED)
            .is_some_and(|c| c.status));
    }

    #[tokio::test]
    async fn step_retries_then_gives_up_and_flags_needs_intervention() {
        // plan/reboot's single step allows 2 retries (3 attempts total).
        let config = FakeProviderConfig::default().with_failures("reboot", 10);
        let (runner, store, machine) = new_machine_and_runner(config).await;
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

        runner.start_operation(op.operation_id.clone()).await.unwrap();
        let phase = terminal_phase(&store, &op.operation_id).await;
        assert_eq!(phase, OperationPhase::Failed);

        let finished = store.get_operation(&op.operation_id).await.unwrap();
        let error = finished.error.expect("failed operation carries an error");
        assert_eq!(error.code, OperationError::EXECUTION_FAILED);
        assert_eq!(error.step_name.as_deref(), Some("reboot"));

        let machine_after = store.get_machine(&machine.machine_id).await.unwrap();
        assert!(machine_after
            .status
            .condition(condition_types::NEEDS_INTERVENTION)
            .is_some_and(|c| c.status));
    }

    #[tokio::test]
    async fn a_panicking_step_is_recovered_and_marks_the_operation_failed() {
        let config = FakeProviderConfig::default().with_panic("reboot");
        let (runner, store, machine) = new_machine_and_runner(config).await;
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

        runner.start_operation(op.operation_id.clone()).await.unwrap();
        let phase = terminal_phase(&store, &op.operation_id).await;
        assert_eq!(phase, OperationPhase::Failed);

        let finished = store.get_operation(&op.operation_id).await.unwrap();
        let error = finished.error.expect("panicked operation carries an error");
        assert_eq!(error.code, OperationError::PANIC);
        assert!(!error.retryable);
    }
}
