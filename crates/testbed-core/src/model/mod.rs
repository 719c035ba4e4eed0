//! Data model
//!
//! Types shared between the config parser, the plan builder, the scheduler
//! and the teardown manager.

mod build;
mod context;
mod environment;
mod health;
mod resource;

// Re-exports
pub use build::*;
pub use context::*;
pub use environment::*;
pub use health::*;
pub use resource::*;
