//! # fleetops-types: Core data model for the fleet control plane
//!
//! This crate contains the shared types used across the fleetops system:
//! - Identity ([`MachineId`], [`OperationId`])
//! - Machine lifecycle ([`Phase`], [`EffectiveState`], [`Condition`])
//! - Operation records ([`Operation`], [`OperationType`], [`OperationPhase`], [`OperationError`])
//! - Workflow internals ([`Plan`], [`Step`], [`StepKind`], [`StepStatus`], [`StepState`])
//!
//! Operations and machines are plain data: every mutation happens through the
//! store or executor, never through methods on these types themselves (the
//! functional-core style keeps this crate free of locking or I/O).

use std::collections::HashMap;
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity
// ============================================================================

/// Unique identifier for a machine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MachineId(String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, random machine id (used when a client registers a
    /// machine without specifying one).
    pub fn generate() -> Self {
        Self(format!("m-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MachineId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<MachineId> for String {
    fn from(id: MachineId) -> Self {
        id.0
    }
}

/// Unique identifier for an operation. Always server-generated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("op-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

// ============================================================================
// Machine lifecycle
// ============================================================================

/// Imperative machine phase.
///
/// This is the superset used internally by lifecycle derivation. The
/// RPC-facing wire enum only advertises `FactoryReady`/`Ready`/`Maintenance`;
/// `Rma`/`Retired` are reachable only through direct store manipulation (see
/// Open Question 1 in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Freshly imaged at the factory, never handed to a customer workload.
    FactoryReady,
    /// Idle and available for operations.
    Ready,
    /// Taken out of service for maintenance; the only phase reimage is allowed from.
    Maintenance,
    /// Flagged for return-merchandise-authorization; out of the RPC surface.
    Rma,
    /// Permanently decommissioned; out of the RPC surface.
    Retired,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::FactoryReady
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::FactoryReady => "FACTORY_READY",
            Phase::Ready => "READY",
            Phase::Maintenance => "MAINTENANCE",
            Phase::Rma => "RMA",
            Phase::Retired => "RETIRED",
        };
        write!(f, "{s}")
    }
}

/// Derived, read-only view of a machine's state.
///
/// Never stored — always computed from `(status, active_operation)` by
/// `fleetops_store::lifecycle::effective_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectiveState {
    FactoryReady,
    Ready,
    Maintenance,
    Rma,
    Retired,
    /// A customer-cluster-joined machine (`InCustomerCluster` condition is true).
    InService,
    /// An active operation (PENDING or RUNNING) is in flight.
    Provisioning,
}

impl Display for EffectiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EffectiveState::FactoryReady => "FACTORY_READY",
            EffectiveState::Ready => "READY",
            EffectiveState::Maintenance => "MAINTENANCE",
            EffectiveState::Rma => "RMA",
            EffectiveState::Retired => "RETIRED",
            EffectiveState::InService => "IN_SERVICE",
            EffectiveState::Provisioning => "PROVISIONING",
        };
        write!(f, "{s}")
    }
}

/// Well-known condition type names. Unknown types are stored verbatim as a
/// plain `String` on [`Condition::type_`] — this module just documents the
/// ones the executor and lifecycle layer understand.
pub mod condition_types {
    /// The machine responds to management-plane health checks.
    pub const REACHABLE: &str = "Reachable";
    /// The machine has successfully joined a customer Kubernetes cluster.
    pub const IN_CUSTOMER_CLUSTER: &str = "InCustomerCluster";
    /// An operation ended in a state that needs an operator to look at it.
    pub const NEEDS_INTERVENTION: &str = "NeedsIntervention";
    /// The machine's most recent operation was canceled by a user.
    pub const OPERATION_CANCELED: &str = "OperationCanceled";
    /// The machine has been successfully repaved with an image.
    pub const PROVISIONED: &str = "Provisioned";
    /// General health signal, independent of reachability.
    pub const HEALTHY: &str = "Healthy";
}

/// A named boolean observation about a machine, with human-readable context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
        last_transition: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition,
        }
    }
}

// ============================================================================
// Machine
// ============================================================================

/// Access hints a provider needs to reach a machine. Fully client-writable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub ssh_endpoint: Option<String>,
    pub bmc_endpoint: Option<String>,
    pub provider: Option<String>,
    pub mac_addresses: Vec<String>,
    pub target_cluster: Option<TargetCluster>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCluster {
    pub cluster_id: String,
}

/// Server-owned lifecycle state. Clients may never set this directly — the
/// service shell strips any client-supplied `status` before it reaches the
/// store (see `fleetops_server`'s `RegisterMachine`/`UpdateMachine` handlers).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatus {
    pub phase: Phase,
    pub active_operation_id: Option<OperationId>,
    pub conditions: Vec<Condition>,
}

impl MachineStatus {
    /// Returns the condition with the given type, if present.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: MachineId,
    pub spec: MachineSpec,
    pub labels: HashMap<String, String>,
    pub status: MachineStatus,
}

impl Machine {
    /// Creates a machine with a freshly generated id and `FactoryReady` phase.
    pub fn new(spec: MachineSpec, labels: HashMap<String, String>) -> Self {
        Self {
            machine_id: MachineId::generate(),
            spec,
            labels,
            status: MachineStatus::default(),
        }
    }
}

// ============================================================================
// Operation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Reboot,
    Reimage,
    EnterMaintenance,
    ExitMaintenance,
}

impl Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Reboot => "REBOOT",
            OperationType::Reimage => "REIMAGE",
            OperationType::EnterMaintenance => "ENTER_MAINTENANCE",
            OperationType::ExitMaintenance => "EXIT_MAINTENANCE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationPhase {
    /// An operation is "active" (counts against the one-per-machine rule)
    /// iff it is `Pending` or `Running`.
    pub fn is_active(self) -> bool {
        matches!(self, OperationPhase::Pending | OperationPhase::Running)
    }

    /// Terminal phases are absorbing: no further transition is ever valid.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationPhase::Succeeded | OperationPhase::Failed | OperationPhase::Canceled
        )
    }
}

impl Display for OperationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationPhase::Pending => "PENDING",
            OperationPhase::Running => "RUNNING",
            OperationPhase::Succeeded => "SUCCEEDED",
            OperationPhase::Failed => "FAILED",
            OperationPhase::Canceled => "CANCELED",
        };
        write!(f, "{s}")
    }
}

/// Error detail recorded on an operation that ended in `Failed`, or that hit
/// a panic during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub step_name: Option<String>,
}

impl OperationError {
    pub const EXECUTION_FAILED: &'static str = "EXECUTION_FAILED";
    pub const PANIC: &'static str = "PANIC";

    pub fn execution_failed(message: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self {
            code: Self::EXECUTION_FAILED.to_string(),
            message: message.into(),
            retryable: true,
            step_name: Some(step_name.into()),
        }
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            code: Self::PANIC.to_string(),
            message: message.into(),
            retryable: false,
            step_name: None,
        }
    }
}

/// Execution status of a single step. Internal-only: stripped before an
/// operation crosses the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepState {
    Waiting,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub name: String,
    pub state: StepState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub message: Option<String>,
}

impl StepStatus {
    pub fn waiting(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StepState::Waiting,
            started_at: None,
            finished_at: None,
            retry_count: 0,
            message: None,
        }
    }
}

/// An execution record for one top-level action against a machine.
///
/// `plan_id` and `steps` are internal-only: the service shell clones and
/// strips them before an `Operation` leaves the process (see
/// `fleetops_server::sanitize`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: OperationId,
    pub machine_id: MachineId,
    pub request_id: String,
    #[serde(rename = "type")]
    pub type_: OperationType,
    pub params: HashMap<String, String>,
    pub phase: OperationPhase,
    pub error: Option<OperationError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    // Internal-only, stripped at the service boundary.
    pub plan_id: String,
    pub steps: Vec<StepStatus>,
}

impl Operation {
    /// Strips `plan_id` and `steps`, the internal workflow fields that must
    /// never reach a client. Always clones first so the in-memory store copy
    /// is untouched.
    pub fn sanitized(&self) -> Operation {
        let mut clone = self.clone();
        clone.plan_id.clear();
        clone.steps.clear();
        clone
    }
}

// ============================================================================
// Plan / Step
// ============================================================================

/// Discriminated union of the provider actions a step can dispatch.
///
/// Deliberately not stringified on the wire — these are internal only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepKind {
    SshCommand { script_ref: String, args: Vec<String> },
    Reboot { force: bool },
    SetNetboot { profile: String },
    RepaveImage { image_ref: String, cloud_init_ref: String },
    KubeadmJoin,
    VerifyInCluster,
    NetReconfig { params: HashMap<String, String> },
    RmaAction { reason: String },
}

impl StepKind {
    /// Short, human-readable tag used in log lines and tracing fields.
    pub fn tag(&self) -> &'static str {
        match self {
            StepKind::SshCommand { .. } => "ssh_command",
            StepKind::Reboot { .. } => "reboot",
            StepKind::SetNetboot { .. } => "set_netboot",
            StepKind::RepaveImage { .. } => "repave_image",
            StepKind::KubeadmJoin => "kubeadm_join",
            StepKind::VerifyInCluster => "verify_in_cluster",
            StepKind::NetReconfig { .. } => "net_reconfig",
            StepKind::RmaAction { .. } => "rma_action",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind, timeout_seconds: u64, max_retries: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            timeout_seconds,
            max_retries,
        }
    }
}

/// An ordered list of steps selected by operation type. The registry hands
/// out deep clones; nothing outside `fleetops_store::plan` can mutate the
/// catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub display_name: String,
    pub steps: Vec<Step>,
}
