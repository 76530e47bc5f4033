//! External collaborators
//!
//! Interfaces to the systems this crate drives but does not implement: the
//! model trainer, the production data store, compute admission, live event
//! delivery and wall-clock time.

pub mod clock;
pub mod data;
pub mod event_bus;
pub mod files;
pub mod limiter;
pub mod trainer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use data::{Baseline, DataError, DataRepository, ProductionSample};
pub use event_bus::{BroadcastEventBus, EventBus, EventBusError, LifecycleEvent};
pub use files::{FileDataRepository, LiveMetricsRecord, SampleBatch};
pub use limiter::{ComputeSlot, LimiterError, ResourceLimiter, SemaphoreLimiter};
pub use trainer::{
    DatasetRef, HoldoutSplit, Metrics, ModelArtifact, TrainedCandidate, Trainer, TrainerError,
    TrainingInput,
};
