//! The hardware/cluster capability surface the executor dispatches steps to.
//!
//! Real implementations (cloud provisioners, BMC drivers, Tailscale route
//! management, kubernetes join controllers) are external collaborators; this
//! crate only defines the seam and ships [`fake::FakeProvider`] for tests.

pub mod error;
pub mod fake;

pub use error::{ProviderError, ProviderResult};
pub use fake::{FakeProvider, FakeProviderConfig};

use std::sync::Arc;

use async_trait::async_trait;
use fleetops_types::{Machine, OperationId, TargetCluster};
use tokio_util::sync::CancellationToken;

/// Which stream a log chunk belongs to, matching the wire-level
/// `"stdout"`/`"stderr"` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

/// The runner's log bus, as seen from inside a provider call. Providers push
/// log chunks through this handle rather than returning them, since a single
/// step can legitimately emit many lines before it resolves.
pub trait LogSink: Send + Sync {
    fn emit(&self, operation_id: &OperationId, stream: LogStream, bytes: Vec<u8>);
}

/// A [`LogSink`] that discards everything. Useful in unit tests that don't
/// care about log output.
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn emit(&self, _operation_id: &OperationId, _stream: LogStream, _bytes: Vec<u8>) {}
}

/// Everything a provider call needs to attribute and bound its work:
/// the machine it targets, the operation it is running under (for log
/// attribution), the cancellation token to honor, and a sink for progress
/// output.
pub struct ProviderContext {
    pub operation_id: OperationId,
    pub machine: Machine,
    pub cancellation: CancellationToken,
    pub log_sink: Arc<dyn LogSink>,
}

impl ProviderContext {
    pub fn log(&self, stream: LogStream, message: String) {
        self.log_sink.emit(&self.operation_id, stream, message.into_bytes());
    }
}

/// Capability surface the executor dispatches plan steps to. One method per
/// step kind in §4.5, plus the two-call `mint_join_material`/`join_node` pair
/// `KubeadmJoin` needs. `NetReconfig` has no provider method — the executor
/// handles it as an internal stub.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn execute_ssh_command(
        &self,
        ctx: &ProviderContext,
        script_ref: &str,
        args: &[String],
    ) -> ProviderResult<()>;

    async fn reboot(&self, ctx: &ProviderContext, force: bool) -> ProviderResult<()>;

    async fn set_netboot(&self, ctx: &ProviderContext, profile: &str) -> ProviderResult<()>;

    async fn repave(&self, ctx: &ProviderContext, image_ref: &str, cloud_init_ref: &str) -> ProviderResult<()>;

    async fn mint_join_material(
        &self,
        ctx: &ProviderContext,
        target_cluster: &TargetCluster,
    ) -> ProviderResult<String>;

    async fn join_node(&self, ctx: &ProviderContext, material: &str) -> ProviderResult<()>;

    async fn verify_in_cluster(&self, ctx: &ProviderContext, target_cluster: &TargetCluster) -> ProviderResult<()>;

    async fn rma(&self, ctx: &ProviderContext, reason: &str) -> ProviderResult<()>;
}
