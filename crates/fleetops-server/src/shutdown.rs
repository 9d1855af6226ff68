//! Graceful shutdown plumbing: cancel in-flight operations, then stop
//! accepting new streams, mirroring the teacher's `Server`/`ShutdownHandle`
//! split.

use std::sync::Arc;

use fleetops_executor::Runner;
use fleetops_provider::Provider;
use tokio::sync::oneshot;

/// Returned by [`crate::serve`]; dropping it does nothing — callers must
/// call [`ShutdownHandle::shutdown`] explicitly to drain in-flight work.
pub struct ShutdownHandle<P: Provider + 'static> {
    runner: Arc<Runner<P>>,
    server_shutdown: oneshot::Sender<()>,
}

impl<P: Provider + 'static> ShutdownHandle<P> {
    pub(crate) fn new(runner: Arc<Runner<P>>, server_shutdown: oneshot::Sender<()>) -> Self {
        Self { runner, server_shutdown }
    }

    /// Cancels every tracked operation's token, then signals the tonic
    /// server to stop accepting new connections and drain in-flight streams.
    pub async fn shutdown(self) {
        self.runner.shutdown().await;
        let _ = self.server_shutdown.send(());
    }
}
