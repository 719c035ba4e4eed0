//! testbed external tool collaborators
//!
//! - [`ProcessGateway`]: runs one CLI invocation under a time budget
//! - [`DockerCli`]: image builds and pulls
//! - [`KindCli`]: local cluster lifecycle
//! - [`Kubectl`]: manifests, patches and pod status
//! - [`DockerRuntime`]: host containers and networks via bollard

pub mod docker;
pub mod error;
pub mod gateway;
pub mod kind;
pub mod kubectl;
pub mod resolver;
pub mod runtime;

pub use docker::DockerCli;
pub use error::*;
pub use gateway::ProcessGateway;
pub use kind::KindCli;
pub use kubectl::Kubectl;
pub use resolver::BuildResolver;
pub use runtime::DockerRuntime;
