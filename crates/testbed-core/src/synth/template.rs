//! Manifest templates
//!
//! Placeholders use tera syntax (`{{ name }}`, filters allowed). Before
//! rendering, every placeholder is checked against the value map so a
//! missing value fails at plan construction instead of at apply time.

use crate::error::SynthError;
use crate::model::{EnvironmentDef, ServiceDef};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tera::{Context, Tera};

const PLACEHOLDER_PATTERN: &str = r"\{\{-?\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\||-?\}\})";
const BOUND_PATTERN: &str = r"\{%-?\s*(?:for\s+([A-Za-z_][A-Za-z0-9_]*)(?:\s*,\s*([A-Za-z_][A-Za-z0-9_]*))?\s+in|set(?:_global)?\s+([A-Za-z_][A-Za-z0-9_]*)\s*=)";

/// Values available to a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValues(BTreeMap<String, String>);

impl TemplateValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn to_context(&self) -> Context {
        let mut context = Context::new();
        for (key, value) in &self.0 {
            context.insert(key.as_str(), value);
        }
        context
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for TemplateValues {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TemplateValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut values = Self::new();
        values.extend(iter);
        values
    }
}

/// Template key of an image reference: `image_<service>`, dashes as underscores
pub fn image_key(service: &str) -> String {
    format!("image_{}", service.replace(['-', '.'], "_"))
}

/// Values every manifest of `service` can use.
///
/// `images` maps image service names to their resolved references. The
/// service's own `values` win over the built-in keys.
pub fn service_values(
    env: &EnvironmentDef,
    service: &ServiceDef,
    run_id: &str,
    images: &BTreeMap<String, String>,
) -> TemplateValues {
    let mut values = TemplateValues::new()
        .with("project", env.project.as_str())
        .with("run_id", run_id)
        .with("namespace", service.namespace());
    values.extend(images.iter().map(|(svc, reference)| (image_key(svc), reference.as_str())));
    values.extend(service.values.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    values
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTemplate {
    /// Used in error messages, usually the file path
    name: String,
    source: String,
}

impl ManifestTemplate {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SynthError> {
        let source = std::fs::read_to_string(path).map_err(|e| SynthError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::new(path.display().to_string(), source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free placeholder names: referenced, and not bound by a `for`/`set` tag
    pub fn placeholders(&self) -> Result<BTreeSet<String>, SynthError> {
        let placeholder = self.compile(PLACEHOLDER_PATTERN)?;
        let bound = self.compile(BOUND_PATTERN)?;

        let bound: BTreeSet<&str> = bound
            .captures_iter(&self.source)
            .flat_map(|cap| [cap.get(1), cap.get(2), cap.get(3)])
            .flatten()
            .map(|m| m.as_str())
            .collect();

        Ok(placeholder
            .captures_iter(&self.source)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str())
            .filter(|name| !bound.contains(name))
            .map(str::to_string)
            .collect())
    }

    /// Placeholders with no value in `values`
    pub fn missing(&self, values: &TemplateValues) -> Result<Vec<String>, SynthError> {
        Ok(self
            .placeholders()?
            .into_iter()
            .filter(|name| !values.contains(name))
            .collect())
    }

    pub fn render(&self, values: &TemplateValues) -> Result<String, SynthError> {
        let missing = self.missing(values)?;
        if !missing.is_empty() {
            return Err(SynthError::UnresolvedPlaceholder {
                template: self.name.clone(),
                names: missing,
            });
        }

        let mut tera = Tera::default();
        tera.render_str(&self.source, &values.to_context())
            .map_err(|e| SynthError::Render {
                template: self.name.clone(),
                message: tera_error_detail(&e),
            })
    }

    fn compile(&self, pattern: &str) -> Result<Regex, SynthError> {
        Regex::new(pattern).map_err(|e| SynthError::Render {
            template: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Flatten tera's error chain into one line
fn tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    details.join(" | ")
}
