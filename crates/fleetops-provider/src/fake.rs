//! In-memory [`Provider`] used by tests. Not a real hardware backend — the
//! timing knobs here exist purely as an interface seam for exercising the
//! executor's retry, cancellation, and panic-recovery paths.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use fleetops_types::TargetCluster;
use tokio::sync::Mutex;

use crate::{Provider, ProviderContext, ProviderError, ProviderResult};

/// Per-step-tag knobs for [`FakeProvider`]. The tag is [`fleetops_types::StepKind::tag`].
#[derive(Debug, Default, Clone)]
pub struct FakeProviderConfig {
    pub delays: HashMap<String, Duration>,
    pub fail_times: HashMap<String, u32>,
    pub panics: HashSet<String>,
}

impl FakeProviderConfig {
    pub fn with_delay(mut self, tag: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(tag.into(), delay);
        self
    }

    pub fn with_failures(mut self, tag: impl Into<String>, times: u32) -> Self {
        self.fail_times.insert(tag.into(), times);
        self
    }

    pub fn with_panic(mut self, tag: impl Into<String>) -> Self {
        self.panics.insert(tag.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeProvider {
    config: FakeProviderConfig,
    call_counts: Mutex<HashMap<String, u32>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FakeProviderConfig) -> Self {
        Self {
            config,
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns how many times a given step tag has been attempted so far.
    pub async fn call_count(&self, tag: &str) -> u32 {
        self.call_counts.lock().await.get(tag).copied().unwrap_or(0)
    }

    async fn simulate(&self, ctx: &ProviderContext, tag: &str) -> ProviderResult<()> {
        if let Some(delay) = self.config.delays.get(tag).copied() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancellation.cancelled() => return Err(ProviderError::Canceled),
            }
        }

        let count = {
            let mut counts = self.call_counts.lock().await;
            let entry = counts.entry(tag.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        if self.config.panics.contains(tag) {
            panic!("fake provider injected panic for step `{tag}` (attempt {count})");
        }

        if let Some(&limit) = self.config.fail_times.get(tag) {
            if count <= limit {
                return Err(ProviderError::Failed(format!(
                    "fake provider simulated failure #{count} for `{tag}`"
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn execute_ssh_command(
        &self,
        ctx: &ProviderContext,
        script_ref: &str,
        _args: &[String],
    ) -> ProviderResult<()> {
        self.simulate(ctx, "ssh_command").await?;
        ctx.log(crate::LogStream::Stdout, format!("ran {script_ref}"));
        Ok(())
    }

    async fn reboot(&self, ctx: &ProviderContext, force: bool) -> ProviderResult<()> {
        self.simulate(ctx, "reboot").await?;
        ctx.log(crate::LogStream::Stdout, format!("rebooted (force={force})"));
        Ok(())
    }

    async fn set_netboot(&self, ctx: &ProviderContext, profile: &str) -> ProviderResult<()> {
        self.simulate(ctx, "set_netboot").await?;
        ctx.log(crate::LogStream::Stdout, format!("netboot profile set to {profile}"));
        Ok(())
    }

    async fn repave(&self, ctx: &ProviderContext, image_ref: &str, _cloud_init_ref: &str) -> ProviderResult<()> {
        self.simulate(ctx, "repave_image").await?;
        ctx.log(crate::LogStream::Stdout, format!("repaved with image {image_ref}"));
        Ok(())
    }

    async fn mint_join_material(
        &self,
        ctx: &ProviderContext,
        target_cluster: &TargetCluster,
    ) -> ProviderResult<String> {
        self.simulate(ctx, "kubeadm_join").await?;
        let material = format!("join-material-for-{}", target_cluster.cluster_id);
        ctx.log(crate::LogStream::Stdout, "minted join material".to_string());
        Ok(material)
    }

    async fn join_node(&self, ctx: &ProviderContext, material: &str) -> ProviderResult<()> {
        ctx.log(crate::LogStream::Stdout, format!("joined node using {material}"));
        Ok(())
    }

    async fn verify_in_cluster(&self, ctx: &ProviderContext, target_cluster: &TargetCluster) -> ProviderResult<()> {
        self.simulate(ctx, "verify_in_cluster").await?;
        ctx.log(
            crate::LogStream::Stdout,
            format!("verified membership in cluster {}", target_cluster.cluster_id),
        );
        Ok(())
    }

    async fn rma(&self, ctx: &ProviderContext, reason: &str) -> ProviderResult<()> {
        self.simulate(ctx, "rma_action").await?;
        ctx.log(crate::LogStream::Stdout, format!("marked for RMA: {reason}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopLogSink;
    use fleetops_types::{Machine, MachineSpec, OperationId};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ProviderContext {
        ProviderContext {
            operation_id: OperationId::new("op-1"),
            machine: Machine::new(MachineSpec::default(), Default::default()),
            cancellation: CancellationToken::new(),
            log_sink: Arc::new(NoopLogSink),
        }
    }

    #[tokio::test]
    async fn fails_exactly_the_configured_number_of_times() {
        let provider = FakeProvider::with_config(FakeProviderConfig::default().with_failures("reboot", 2));
        let ctx = ctx();
        assert!(provider.reboot(&ctx, false).await.is_err());
        assert!(provider.reboot(&ctx, false).await.is_err());
        assert!(provider.reboot(&ctx, false).await.is_ok());
        assert_eq!(provider.call_count("reboot").await, 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_delayed_call() {
        let provider = FakeProvider::with_config(
            FakeProviderConfig::default().with_delay("reboot", Duration::from_secs(10)),
        );
        let ctx = ctx();
        ctx.cancellation.cancel();
        let err = provider.reboot(&ctx, false).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    #[should_panic(expected = "fake provider injected panic")]
    async fn injected_panic_actually_panics() {
        let provider = FakeProvider::with_config(FakeProviderConfig::default().with_panic("reboot"));
        let ctx = ctx();
        let _ = provider.reboot(&ctx, false).await;
    }
}
