//! patch node

use super::{arg_string, prop_string, prop_u32, required_arg};
use crate::error::{ConfigError, Result};
use kdl::KdlNode;
use std::path::PathBuf;
use testbed_core::{PatchDef, PatchValue, ValueEncoding};

/// ```kdl
/// patch "webhook-ca" tier=1 {
///     resource "validatingwebhookconfiguration" "api-webhook"
///     path "/webhooks/0/clientConfig/caBundle"
///     value_from_file "certs/ca.crt" encoding="base64"
/// }
/// ```
pub fn parse_patch(node: &KdlNode) -> Result<PatchDef> {
    let name = required_arg(node, "patch name")?;
    let invalid =
        |message: String| ConfigError::invalid("patch", format!("'{}': {}", name, message));

    let mut kind = None;
    let mut resource = None;
    let mut namespace = None;
    let mut path = None;
    let mut value = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "resource" => {
                    kind = arg_string(child, 0).map(str::to_string);
                    resource = arg_string(child, 1).map(str::to_string);
                    if resource.is_none() {
                        return Err(invalid("resource expects a kind and a name".to_string()));
                    }
                }
                "namespace" => {
                    namespace = Some(required_arg(child, "namespace")?.to_string());
                }
                "path" => {
                    path = Some(required_arg(child, "path")?.to_string());
                }
                "value" => {
                    value = Some(PatchValue::Literal(required_arg(child, "value")?.to_string()));
                }
                "value_from_file" => {
                    let file = required_arg(child, "value file")?;
                    let encoding = match prop_string(child, "encoding") {
                        Some(raw) => ValueEncoding::parse(raw).ok_or_else(|| {
                            invalid(format!("unknown encoding '{}' (base64 or raw)", raw))
                        })?,
                        None => ValueEncoding::default(),
                    };
                    value = Some(PatchValue::File {
                        path: PathBuf::from(file),
                        encoding,
                    });
                }
                other => return Err(invalid(format!("unknown child '{}'", other))),
            }
        }
    }

    Ok(PatchDef {
        name: name.to_string(),
        tier: prop_u32(node, "tier")?.unwrap_or(0),
        kind: kind.ok_or_else(|| invalid("resource is required".to_string()))?,
        resource: resource.ok_or_else(|| invalid("resource is required".to_string()))?,
        namespace,
        path: path.ok_or_else(|| invalid("path is required".to_string()))?,
        value: value.ok_or_else(|| invalid("value or value_from_file is required".to_string()))?,
    })
}
