//! testbed core
//!
//! Shared vocabulary of the provisioning engine: the data model, the error
//! taxonomy, collision-free resource naming, manifest/config synthesis and
//! the traits through which external tools are driven.
//!
//! ```text
//! testbed (CLI)
//!   └─ testbed-engine   scheduler, prober, plan builder, teardown
//!        ├─ testbed-core    model, errors, namer, synth, traits
//!        ├─ testbed-config  testbed.kdl -> EnvironmentDef
//!        └─ testbed-exec    docker / kind / kubectl / bollard
//! ```

pub mod collaborator;
pub mod error;
pub mod model;
pub mod namer;
pub mod synth;

pub use collaborator::*;
pub use error::*;
pub use model::*;
pub use namer::{ResourceNamer, is_valid_name};
