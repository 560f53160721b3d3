//! Scheduling engine: the bounded job queue, retry policy, background
//! monitors, and the control plane that ties them together.

pub mod control;
pub mod queue;
pub mod retry;
pub mod stuck;
pub mod system;

pub use control::{ControlConfig, ControlPlane};
pub use queue::{Executor, JobQueue, QueueConfig, QueueStatus};
pub use retry::{FailureClass, RetryPolicy};
pub use stuck::{StuckConfig, StuckJobMonitor, StuckStats};
pub use system::{SystemMonitor, SystemMonitorConfig};
