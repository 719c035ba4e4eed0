//! service node

use super::{prop_bool, prop_duration, prop_string, prop_u16, prop_u32, required_arg, string_map};
use crate::error::{ConfigError, Result};
use kdl::KdlNode;
use std::path::PathBuf;
use testbed_core::{PortMapping, ReadyDef, ReadyTarget, ServiceDef, ServiceKind};

/// ```kdl
/// service "api" kind="manifest" tier=1 {
///     manifest "deploy/api.yaml"
///     namespace "checkout"
///     values { LOG_LEVEL "debug" }
///     endpoint "http://localhost:18080"
///     ready http="http://localhost:18080/healthz" interval=2 deadline=120
///     ready selector="app=api" replicas=2
///     coverage_path "/coverage"
/// }
///
/// service "db" kind="container" {
///     image "postgres:16"
///     port host=15432 container=5432
///     env { POSTGRES_PASSWORD "test" }
///     ready container=#true
/// }
/// ```
///
/// Without `kind=`, a service with a `manifest` child is a manifest service
/// and anything else a container service.
pub fn parse_service(node: &KdlNode) -> Result<ServiceDef> {
    let name = required_arg(node, "service name")?;

    let explicit_kind = match prop_string(node, "kind") {
        Some(kind) => Some(ServiceKind::parse(kind).ok_or_else(|| {
            ConfigError::invalid(
                "service",
                format!("'{}': kind must be \"manifest\" or \"container\", got \"{}\"", name, kind),
            )
        })?),
        None => None,
    };

    let mut service = ServiceDef::new(name, explicit_kind.unwrap_or(ServiceKind::Container));
    service.tier = prop_u32(node, "tier")?.unwrap_or(0);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "manifest" => {
                    service.manifest = Some(PathBuf::from(required_arg(child, "manifest path")?));
                }
                "namespace" => {
                    service.namespace = Some(required_arg(child, "namespace")?.to_string());
                }
                "values" => {
                    service.values.extend(string_map(child));
                }
                "image" => {
                    service.image = Some(required_arg(child, "image")?.to_string());
                }
                "port" => {
                    service.ports.push(parse_port(child)?);
                }
                "env" | "environment" => {
                    service.env.extend(string_map(child));
                }
                "endpoint" => {
                    service.endpoint = Some(required_arg(child, "endpoint url")?.to_string());
                }
                "ready" => {
                    service.ready.push(parse_ready(name, child)?);
                }
                "coverage_path" => {
                    service.coverage_path = Some(required_arg(child, "coverage path")?.to_string());
                }
                other => {
                    return Err(ConfigError::invalid(
                        "service",
                        format!("'{}': unknown child '{}'", name, other),
                    ));
                }
            }
        }
    }

    if explicit_kind.is_none() && service.manifest.is_some() {
        service.kind = ServiceKind::Manifest;
    }

    Ok(service)
}

fn parse_port(node: &KdlNode) -> Result<PortMapping> {
    let host = prop_u16(node, "host")?;
    let container = prop_u16(node, "container")?;
    match (host, container) {
        (Some(host), Some(container)) => Ok(PortMapping { host, container }),
        (Some(port), None) | (None, Some(port)) => Ok(PortMapping {
            host: port,
            container: port,
        }),
        (None, None) => Err(ConfigError::invalid("port", "host= or container= is required")),
    }
}

fn parse_ready(service: &str, node: &KdlNode) -> Result<ReadyDef> {
    let target = if let Some(url) = prop_string(node, "http") {
        ReadyTarget::Http {
            url: url.to_string(),
        }
    } else if let Some(selector) = prop_string(node, "selector") {
        ReadyTarget::Selector {
            selector: selector.to_string(),
            replicas: prop_u32(node, "replicas")?.unwrap_or(1),
        }
    } else if prop_bool(node, "container") == Some(true) {
        ReadyTarget::Container
    } else {
        return Err(ConfigError::invalid(
            "ready",
            format!(
                "'{}': expects http=\"<url>\", selector=\"<labels>\" or container=#true",
                service
            ),
        ));
    };

    let mut ready = ReadyDef::new(target);
    if let Some(interval) = prop_duration(node, "interval")? {
        ready.interval = interval;
    }
    if let Some(deadline) = prop_duration(node, "deadline")? {
        ready.deadline = deadline;
    }
    Ok(ready)
}
