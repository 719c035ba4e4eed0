//! cluster node

use super::{arg_duration, arg_string, prop_bool, prop_string, required_arg};
use crate::error::{ConfigError, Result};
use kdl::KdlNode;
use std::path::PathBuf;
use testbed_core::{ClusterDef, MountDef};

/// Logical cluster name when the node has no argument
pub const DEFAULT_CLUSTER_NAME: &str = "cluster";

/// ```kdl
/// cluster "e2e" {
///     config "kind.yaml"
///     wait 120
///     mount host="./coverage" container="/coverage"
///     mount host="./certs" container="/etc/certs" readonly=#true
/// }
/// ```
pub fn parse_cluster(node: &KdlNode) -> Result<ClusterDef> {
    let mut cluster = ClusterDef::new(arg_string(node, 0).unwrap_or(DEFAULT_CLUSTER_NAME));

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "config" => {
                    cluster.config = Some(PathBuf::from(required_arg(child, "config path")?));
                }
                "wait" => {
                    cluster.wait = arg_duration(child)?;
                }
                "mount" => {
                    cluster.mounts.push(parse_mount(child)?);
                }
                other => {
                    return Err(ConfigError::invalid(
                        "cluster",
                        format!("unknown child '{}'", other),
                    ));
                }
            }
        }
    }

    Ok(cluster)
}

fn parse_mount(node: &KdlNode) -> Result<MountDef> {
    let host = prop_string(node, "host")
        .ok_or_else(|| ConfigError::invalid("mount", "host= is required"))?;
    let container = prop_string(node, "container")
        .ok_or_else(|| ConfigError::invalid("mount", "container= is required"))?;

    let mut mount = MountDef::new(host, container);
    if prop_bool(node, "readonly").unwrap_or(false) {
        mount = mount.read_only();
    }
    Ok(mount)
}
