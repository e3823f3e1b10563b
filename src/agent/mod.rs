//! Connection-resilient publishing engine
//!
//! Two independent loops, the [`EdgeDetector`] and the [`HeartbeatEmitter`],
//! publish through one shared [`EventPublisher`]. Publish failures are
//! recovered by the [`ConnectionSupervisor`]; the [`Runner`] wires them
//! together and owns shutdown.

pub mod edge_detector;
pub mod heartbeat;
pub mod publisher;
pub mod runner;
pub mod supervisor;

pub use edge_detector::{
    EdgeDetector, EdgeDetectorSettings, EdgeTracker, EdgeTrigger, InactivityWatch,
};
pub use heartbeat::HeartbeatEmitter;
pub use publisher::{EventPublisher, PublishOutcome};
pub use runner::{RunSummary, Runner, RunnerSettings};
pub use supervisor::{
    ConnectOutcome, ConnectionEvent, ConnectionState, ConnectionSupervisor, ReconnectPolicy,
};

use tokio::sync::watch;

/// Resolves once shutdown is requested; never if the sender is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}
