//! Overlap sampling between a reference and a target chain.
pub mod bootstrap;
pub mod checkpoint;
pub mod coordinator;
pub mod replicas;
pub mod scheduler;
pub mod transform;

pub use bootstrap::{BootstrapPhase, BootstrapState, CenterStore, ReferenceParameterBootstrap};
pub use checkpoint::SchedulerCheckpoint;
pub use coordinator::{OverlapCoordinator, OverlapResult};
pub use replicas::{run_replicas, ReplicaResult};
pub use scheduler::{DualChainScheduler, SchedulerState};
pub use transform::{fermi, OverlapWeightTransform};
