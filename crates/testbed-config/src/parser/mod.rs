//! KDL parser
//!
//! Parses `testbed.kdl` into an [`EnvironmentDef`]. Each top-level node
//! type has its own module.

mod cluster;
mod image;
mod patch;
mod service;


use crate::error::{ConfigError, Result};
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use testbed_core::{EnvironmentDef, RegistryCoordinates};

/// Tag used with `registry` when none is given
pub const DEFAULT_REGISTRY_TAG: &str = "latest";

/// Parse a file. The project name defaults to the containing directory's name.
pub fn parse_environment_file(path: &Path) -> Result<EnvironmentDef> {
    let content = read(path)?;
    let default_project = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("testbed");
    parse_environment_str(&content, default_project)
}

pub fn parse_environment_str(content: &str, default_project: &str) -> Result<EnvironmentDef> {
    let mut env = EnvironmentDef::new(default_project);
    merge_into(content, &mut env)?;
    Ok(env)
}

/// Apply the nodes of `content` on top of `env`.
///
/// Scalars (`project`, `registry`, single timeouts, `cluster`) replace what
/// is there; `image`, `service` and `patch` entries are appended.
pub fn merge_into(content: &str, env: &mut EnvironmentDef) -> Result<()> {
    let doc: KdlDocument = content.parse()?;

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                env.project = required_arg(node, "project name")?.to_string();
            }
            "registry" => {
                let registry = required_arg(node, "registry host")?;
                let tag = prop_string(node, "tag").unwrap_or(DEFAULT_REGISTRY_TAG);
                env.registry = Some(RegistryCoordinates::new(registry, tag));
            }
            "timeouts" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        let key = child.name().value();
                        let value = child
                            .entries()
                            .first()
                            .and_then(|e| duration_value(e.value()))
                            .ok_or_else(|| {
                                ConfigError::invalid("timeouts", format!("'{}' needs seconds", key))
                            })?;
                        if !env.budgets.set(key, value) {
                            return Err(ConfigError::invalid(
                                "timeouts",
                                format!("unknown timeout '{}'", key),
                            ));
                        }
                    }
                }
            }
            "cluster" => {
                env.cluster = Some(cluster::parse_cluster(node)?);
            }
            "image" => {
                env.images.push(image::parse_image(node)?);
            }
            "service" => {
                env.services.push(service::parse_service(node)?);
            }
            "patch" => {
                env.patches.push(patch::parse_patch(node)?);
            }
            other => {
                tracing::warn!(node = %other, "ignoring unknown node");
            }
        }
    }

    Ok(())
}

pub(crate) fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Positional (unnamed) arguments of a node
pub(crate) fn args(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
}

pub(crate) fn arg_string(node: &KdlNode, index: usize) -> Option<&str> {
    args(node).nth(index).and_then(|v| v.as_string())
}

pub(crate) fn required_arg<'a>(node: &'a KdlNode, what: &str) -> Result<&'a str> {
    arg_string(node, 0)
        .ok_or_else(|| ConfigError::invalid(node.name().value(), format!("{} is required", what)))
}

pub(crate) fn prop_string<'a>(node: &'a KdlNode, key: &str) -> Option<&'a str> {
    node.get(key).and_then(|v| v.as_string())
}

pub(crate) fn prop_u32(node: &KdlNode, key: &str) -> Result<Option<u32>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|i| u32::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| {
                ConfigError::invalid(
                    node.name().value(),
                    format!("'{}' must be a non-negative integer", key),
                )
            }),
    }
}

pub(crate) fn prop_u16(node: &KdlNode, key: &str) -> Result<Option<u16>> {
    prop_u32(node, key)?
        .map(|v| {
            u16::try_from(v).map_err(|_| {
                ConfigError::invalid(node.name().value(), format!("'{}' is not a port", key))
            })
        })
        .transpose()
}

pub(crate) fn prop_bool(node: &KdlNode, key: &str) -> Option<bool> {
    node.get(key).and_then(|v| v.as_bool())
}

pub(crate) fn prop_duration(node: &KdlNode, key: &str) -> Result<Option<Duration>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => duration_value(value).map(Some).ok_or_else(|| {
            ConfigError::invalid(
                node.name().value(),
                format!("'{}' must be a number of seconds", key),
            )
        }),
    }
}

/// Seconds, integer or fractional
pub(crate) fn duration_value(value: &KdlValue) -> Option<Duration> {
    if let Some(i) = value.as_integer() {
        u64::try_from(i).ok().map(Duration::from_secs)
    } else if let Some(f) = value.as_float() {
        (f.is_finite() && f >= 0.0).then(|| Duration::from_secs_f64(f))
    } else {
        None
    }
}

/// First argument of a child node parsed as seconds
pub(crate) fn arg_duration(node: &KdlNode) -> Result<Duration> {
    args(node).next().and_then(duration_value).ok_or_else(|| {
        ConfigError::invalid(node.name().value(), "expects a number of seconds")
    })
}

/// `name { KEY "value" ... }` blocks
pub(crate) fn string_map(node: &KdlNode) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = child
                .entries()
                .first()
                .map(|e| scalar_to_string(e.value()))
                .unwrap_or_default();
            map.insert(key, value);
        }
    }
    map
}

fn scalar_to_string(value: &KdlValue) -> String {
    if let Some(s) = value.as_string() {
        s.to_string()
    } else if let Some(i) = value.as_integer() {
        i.to_string()
    } else if let Some(f) = value.as_float() {
        f.to_string()
    } else if let Some(b) = value.as_bool() {
        b.to_string()
    } else {
        String::new()
    }
}
