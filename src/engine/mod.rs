//! Worker pool engine: workers, the elastic pool, and the autoscaler loop.

pub mod autoscaler;
pub mod pool;
pub mod processor;
pub mod worker;

pub use autoscaler::{
    Autoscaler, AutoscalerConfig, AutoscalerExit, AutoscalerReport, ScaleDecision, TickOutcome, decide,
};
pub use pool::{PoolConfig, ScaleOutcome, ShutdownReport, WorkerPool};
pub use processor::{Processor, SimulatedProcessor};
pub use worker::{Worker, WorkerDeps, WorkerExit, WorkerId, WorkerState, WorkerSummary};
