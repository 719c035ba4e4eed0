use crate::error::{ExecError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use testbed_core::BuildSpec;

/// Build argument keys that should never end up in image history
const SENSITIVE_ARG_PATTERNS: [&str; 5] = ["password", "token", "secret", "api_key", "private_key"];

/// Resolves build inputs against the project root
#[derive(Debug, Clone)]
pub struct BuildResolver {
    project_root: PathBuf,
}

impl BuildResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Resolve the Dockerfile for a build spec.
    ///
    /// Lookup order:
    /// 1. explicit `dockerfile`
    /// 2. conventions:
    ///    - ./services/{service}/Dockerfile
    ///    - ./{service}/Dockerfile
    ///    - ./Dockerfile.{service}
    ///    - {context}/Dockerfile
    pub fn resolve_dockerfile(&self, spec: &BuildSpec) -> Result<PathBuf> {
        if let Some(definition) = &spec.definition {
            let path = self.project_root.join(definition);
            if path.is_file() {
                return Ok(path);
            }
            return Err(ExecError::DockerfileNotFound(path));
        }

        let context = spec
            .context
            .as_ref()
            .map(|c| self.project_root.join(c))
            .unwrap_or_else(|| self.project_root.clone());

        let candidates = [
            self.project_root
                .join("services")
                .join(&spec.service)
                .join("Dockerfile"),
            self.project_root.join(&spec.service).join("Dockerfile"),
            self.project_root.join(format!("Dockerfile.{}", spec.service)),
            context.join("Dockerfile"),
        ];

        for path in candidates {
            if path.is_file() {
                tracing::debug!(
                    service = %spec.service,
                    path = %path.display(),
                    "found Dockerfile"
                );
                return Ok(path);
            }
        }

        Err(ExecError::DockerfileNotFound(context.join("Dockerfile")))
    }

    /// Build context directory. Defaults to the project root.
    pub fn resolve_context(&self, spec: &BuildSpec) -> Result<PathBuf> {
        let context = match &spec.context {
            Some(ctx) => self.project_root.join(ctx),
            None => self.project_root.clone(),
        };

        if !context.exists() {
            return Err(ExecError::ContextNotFound(context));
        }
        if !context.is_dir() {
            return Err(ExecError::InvalidContext(context));
        }

        Ok(context)
    }

    /// Build arguments for `spec`, plus the coverage switch when requested
    pub fn resolve_build_args(
        &self,
        spec: &BuildSpec,
        coverage_arg: Option<&str>,
    ) -> BTreeMap<String, String> {
        let mut args = spec.args.clone();
        if spec.coverage
            && let Some(key) = coverage_arg
        {
            args.insert(key.to_string(), "1".to_string());
        }
        for key in args.keys() {
            self.validate_build_arg(key);
        }
        args
    }

    /// Warn about build arguments that look like secrets
    pub fn validate_build_arg(&self, key: &str) {
        let key_lower = key.to_lowercase();
        if SENSITIVE_ARG_PATTERNS.iter().any(|p| key_lower.contains(p)) {
            tracing::warn!(
                arg = %key,
                "build argument may contain a secret; build arguments are recorded in image history"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_dockerfile_explicit() {
        let temp_dir = tempdir().unwrap();
        let dockerfile_path = temp_dir.path().join("custom.dockerfile");
        fs::write(&dockerfile_path, "FROM alpine").unwrap();

        let resolver = BuildResolver::new(temp_dir.path());
        let spec = BuildSpec::new("api", "acme/api").with_definition("custom.dockerfile");

        assert_eq!(resolver.resolve_dockerfile(&spec).unwrap(), dockerfile_path);
    }

    #[test]
    fn test_resolve_dockerfile_explicit_missing() {
        let temp_dir = tempdir().unwrap();
        let resolver = BuildResolver::new(temp_dir.path());
        let spec = BuildSpec::new("api", "acme/api").with_definition("nope/Dockerfile");

        let err = resolver.resolve_dockerfile(&spec).unwrap_err();
        assert!(matches!(err, ExecError::DockerfileNotFound(_)));
    }

    #[test]
    fn test_resolve_dockerfile_convention_services() {
        let temp_dir = tempdir().unwrap();
        let services_dir = temp_dir.path().join("services/api");
        fs::create_dir_all(&services_dir).unwrap();
        fs::write(services_dir.join("Dockerfile"), "FROM alpine").unwrap();
        fs::write(temp_dir.path().join("Dockerfile.api"), "FROM alpine").unwrap();

        let resolver = BuildResolver::new(temp_dir.path());
        let spec = BuildSpec::new("api", "acme/api");

        assert_eq!(
            resolver.resolve_dockerfile(&spec).unwrap(),
            services_dir.join("Dockerfile")
        );
    }

    #[test]
    fn test_resolve_dockerfile_suffix_convention() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("Dockerfile.worker"), "FROM alpine").unwrap();

        let resolver = BuildResolver::new(temp_dir.path());
        let spec = BuildSpec::new("worker", "acme/worker");

        assert_eq!(
            resolver.resolve_dockerfile(&spec).unwrap(),
            temp_dir.path().join("Dockerfile.worker")
        );
    }

    #[test]
    fn test_resolve_dockerfile_in_context() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir(temp_dir.path().join("web")).unwrap();
        fs::write(temp_dir.path().join("web/Dockerfile"), "FROM nginx").unwrap();

        let resolver = BuildResolver::new(temp_dir.path());
        let spec = BuildSpec::new("frontend", "acme/frontend").with_context("web");

        assert_eq!(
            resolver.resolve_dockerfile(&spec).unwrap(),
            temp_dir.path().join("web/Dockerfile")
        );
    }

    #[test]
    fn test_resolve_context_default_and_errors() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("file.txt"), "").unwrap();
        let resolver = BuildResolver::new(temp_dir.path());

        let spec = BuildSpec::new("api", "acme/api");
        assert_eq!(resolver.resolve_context(&spec).unwrap(), temp_dir.path());

        let missing = BuildSpec::new("api", "acme/api").with_context("absent");
        assert!(matches!(
            resolver.resolve_context(&missing),
            Err(ExecError::ContextNotFound(_))
        ));

        let file = BuildSpec::new("api", "acme/api").with_context("file.txt");
        assert!(matches!(
            resolver.resolve_context(&file),
            Err(ExecError::InvalidContext(_))
        ));
    }

    #[test]
    fn test_coverage_arg_only_for_instrumented_builds() {
        let resolver = BuildResolver::new("/tmp");
        let plain = BuildSpec::new("api", "acme/api").with_arg("GO_VERSION", "1.22");
        let instrumented = plain.clone().with_coverage(true);

        let args = resolver.resolve_build_args(&plain, Some("COVERAGE"));
        assert!(!args.contains_key("COVERAGE"));

        let args = resolver.resolve_build_args(&instrumented, Some("COVERAGE"));
        assert_eq!(args.get("COVERAGE").map(String::as_str), Some("1"));
        assert_eq!(args.get("GO_VERSION").map(String::as_str), Some("1.22"));

        let args = resolver.resolve_build_args(&instrumented, None);
        assert_eq!(args.len(), 1);
    }
}
