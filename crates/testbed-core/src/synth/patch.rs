//! Targeted single-field patches
//!
//! Used for values that only exist after a resource was created, such as a
//! CA bundle injected into a webhook configuration.

use crate::error::SynthError;
use crate::model::{PatchDef, PatchValue, ValueEncoding};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::path::Path;

/// Replace exactly one field of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPatch {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    /// JSON pointer (RFC 6901)
    pub pointer: String,
    pub value: Value,
}

impl FieldPatch {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        pointer: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, SynthError> {
        let pointer = pointer.into();
        if !pointer.starts_with('/') {
            return Err(SynthError::InvalidPointer(pointer));
        }
        Ok(Self {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
            pointer,
            value: value.into(),
        })
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Build from a definition, reading file values relative to `root`
    pub fn from_def(def: &PatchDef, root: &Path) -> Result<Self, SynthError> {
        let value = resolve_value(&def.value, root)?;
        Ok(Self::new(&def.kind, &def.resource, &def.path, value)?
            .with_namespace(def.namespace.clone()))
    }

    /// `kind/name`, as understood by the control plane
    pub fn target(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    /// Replace the field in a fetched copy of the resource.
    ///
    /// Fails when the path does not exist; the patch never creates fields.
    pub fn apply(&self, resource: &mut Value) -> Result<(), SynthError> {
        match resource.pointer_mut(&self.pointer) {
            Some(slot) => {
                *slot = self.value.clone();
                Ok(())
            }
            None => Err(SynthError::PathNotFound {
                kind: self.kind.clone(),
                name: self.name.clone(),
                path: self.pointer.clone(),
            }),
        }
    }

    /// RFC 6902 document with a single `replace` operation
    pub fn to_json_patch(&self) -> Value {
        json!([{ "op": "replace", "path": self.pointer, "value": self.value }])
    }
}

/// Literal values pass through; file values are read and encoded.
pub fn resolve_value(value: &PatchValue, root: &Path) -> Result<String, SynthError> {
    match value {
        PatchValue::Literal(s) => Ok(s.clone()),
        PatchValue::File { path, encoding } => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            let bytes = std::fs::read(&path).map_err(|e| SynthError::Io {
                path: path.clone(),
                message: e.to_string(),
            })?;
            Ok(match encoding {
                ValueEncoding::Base64 => STANDARD.encode(&bytes),
                ValueEncoding::Raw => String::from_utf8_lossy(&bytes).into_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook() -> Value {
        json!({
            "apiVersion": "admissionregistration.k8s.io/v1",
            "kind": "ValidatingWebhookConfiguration",
            "metadata": { "name": "api-webhook" },
            "webhooks": [
                { "name": "validate.api", "clientConfig": { "caBundle": "", "service": { "name": "api" } } }
            ]
        })
    }

    #[test]
    fn test_apply_replaces_only_the_target_field() {
        let patch = FieldPatch::new(
            "validatingwebhookconfiguration",
            "api-webhook",
            "/webhooks/0/clientConfig/caBundle",
            "LS0tLS1CRUdJTg==",
        )
        .unwrap();

        let mut doc = webhook();
        patch.apply(&mut doc).unwrap();

        assert_eq!(doc["webhooks"][0]["clientConfig"]["caBundle"], "LS0tLS1CRUdJTg==");
        assert_eq!(doc["webhooks"][0]["clientConfig"]["service"]["name"], "api");
    }

    #[test]
    fn test_missing_path_fails_loudly() {
        let patch = FieldPatch::new(
            "validatingwebhookconfiguration",
            "api-webhook",
            "/webhooks/3/clientConfig/caBundle",
            "x",
        )
        .unwrap();

        let mut doc = webhook();
        let err = patch.apply(&mut doc).unwrap_err();
        assert_eq!(
            err,
            SynthError::PathNotFound {
                kind: "validatingwebhookconfiguration".to_string(),
                name: "api-webhook".to_string(),
                path: "/webhooks/3/clientConfig/caBundle".to_string(),
            }
        );
        assert_eq!(doc, webhook());
    }

    #[test]
    fn test_pointer_must_be_absolute() {
        let err = FieldPatch::new("configmap", "cfg", "data.key", "v").unwrap_err();
        assert!(matches!(err, SynthError::InvalidPointer(_)));
    }

    #[test]
    fn test_json_patch_is_single_replace() {
        let patch = FieldPatch::new("configmap", "cfg", "/data/key", "v").unwrap();
        assert_eq!(patch.target(), "configmap/cfg");
        assert_eq!(
            patch.to_json_patch(),
            json!([{ "op": "replace", "path": "/data/key", "value": "v" }])
        );
    }

    #[test]
    fn test_file_value_is_base64_encoded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ca.crt"), "-----BEGIN").unwrap();

        let def = PatchDef {
            name: "ca".to_string(),
            tier: 1,
            kind: "validatingwebhookconfiguration".to_string(),
            resource: "api-webhook".to_string(),
            namespace: None,
            path: "/webhooks/0/clientConfig/caBundle".to_string(),
            value: PatchValue::File {
                path: "ca.crt".into(),
                encoding: ValueEncoding::Base64,
            },
        };

        let patch = FieldPatch::from_def(&def, dir.path()).unwrap();
        assert_eq!(patch.value, Value::String("LS0tLS1CRUdJTg==".to_string()));
    }
}
