//! testbed engine
//!
//! Runs a [`ProvisioningPlan`] phase by phase: every task of a phase runs
//! concurrently, the next phase starts only after all of them reported, and
//! a failed phase stops the plan with every failure of that phase.
//!
//! ```text
//! PlanBuilder ──► ProvisioningPlan ──► PhaseScheduler ──► ProvisioningResult
//!                                                              │
//!                                          LifecycleManager ◄──┘
//! ```

pub mod error;
pub mod phase;
pub mod planner;
pub mod probe;
pub mod scheduler;
pub mod task;
pub mod teardown;

pub use error::{EngineError, Result, TeardownError};
pub use phase::{Phase, ProvisioningPlan};
pub use planner::{Collaborators, PlanBuilder, image_task};
pub use probe::{
    ContainerProbe, HttpProbe, Observation, Probe, ReadinessProber, ReplicasProbe, wait_until_ready,
};
pub use scheduler::{PhaseScheduler, PlanState, SchedulerEvent, TaskRecord};
pub use task::{PlanOutputs, Task, TaskOutput, TaskScope};
pub use teardown::{LifecycleManager, StepOutcome, TeardownReport, TeardownStep, teardown_order};
