//! image node

use super::{prop_bool, required_arg, string_map};
use crate::error::{ConfigError, Result};
use kdl::KdlNode;
use std::path::PathBuf;
use testbed_core::BuildSpec;

/// ```kdl
/// image "api" {
///     target "acme/checkout-api"
///     dockerfile "services/api/Dockerfile"
///     context "."
///     coverage #true
///     arg GO_VERSION "1.22"
/// }
/// ```
///
/// `target` defaults to the service name.
pub fn parse_image(node: &KdlNode) -> Result<BuildSpec> {
    let service = required_arg(node, "image service name")?;
    let mut spec = BuildSpec::new(service, service);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "target" => {
                    spec.target = required_arg(child, "target")?.to_string();
                }
                "dockerfile" => {
                    spec.definition = Some(PathBuf::from(required_arg(child, "dockerfile path")?));
                }
                "context" => {
                    spec.context = Some(PathBuf::from(required_arg(child, "context path")?));
                }
                "coverage" => {
                    spec.coverage = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_bool())
                        .unwrap_or(true);
                }
                "arg" => {
                    let key = required_arg(child, "build argument name")?;
                    let value = super::arg_string(child, 1).unwrap_or_default();
                    spec.args.insert(key.to_string(), value.to_string());
                }
                "args" => {
                    spec.args.extend(string_map(child));
                }
                other => {
                    return Err(ConfigError::invalid(
                        "image",
                        format!("unknown child '{}'", other),
                    ));
                }
            }
        }
    }

    if prop_bool(node, "coverage") == Some(true) {
        spec.coverage = true;
    }

    Ok(spec)
}
