//! Manifest/config synthesis
//!
//! Pure transformations of configuration text. Nothing here talks to a
//! cluster or a container runtime.

mod mounts;
mod patch;
mod template;

pub use mounts::{DEFAULT_CLUSTER_CONFIG, MOUNT_ANCHOR, MOUNT_NODE_ROLE, inject_mounts};
pub use patch::{FieldPatch, resolve_value};
pub use template::{ManifestTemplate, TemplateValues, image_key, service_values};
