//! testbed environment definitions
//!
//! Finds `testbed.kdl`, layers it over the user's global defaults and
//! parses the result into a [`testbed_core::EnvironmentDef`].

pub mod error;
pub mod parser;
pub mod validate;

pub use error::*;
pub use parser::{merge_into, parse_environment_file, parse_environment_str};
pub use validate::{problems, validate};

use std::path::{Path, PathBuf};
use testbed_core::EnvironmentDef;

/// Environment variable naming the definition file explicitly
pub const FILE_ENV_VAR: &str = "TESTBED_FILE";

/// File names looked up in the project directory, in priority order
pub const FILE_CANDIDATES: [&str; 2] = ["testbed.local.kdl", "testbed.kdl"];

/// Directory also searched for the definition (and the default work dir)
pub const PROJECT_DIR_NAME: &str = ".testbed";

const DEFAULTS_FILE: &str = "defaults.kdl";

/// A parsed definition and the directory its relative paths resolve against
#[derive(Debug, Clone)]
pub struct LoadedEnvironment {
    pub path: PathBuf,
    pub root: PathBuf,
    pub env: EnvironmentDef,
}

/// Find the environment definition.
///
/// Lookup order:
/// 1. `explicit` (`--file` or `TESTBED_FILE`)
/// 2. `start`: `testbed.local.kdl`, `testbed.kdl`
/// 3. `start/.testbed/`: same order
pub fn find_environment_file(start: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    let mut searched = Vec::new();

    if let Some(path) = explicit {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            start.join(path)
        };
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::NotFound {
            searched: vec![path],
        });
    }

    for dir in [start.to_path_buf(), start.join(PROJECT_DIR_NAME)] {
        for name in FILE_CANDIDATES {
            let path = dir.join(name);
            if path.is_file() {
                tracing::debug!(path = %path.display(), "found environment definition");
                return Ok(path);
            }
            searched.push(path);
        }
    }

    Err(ConfigError::NotFound { searched })
}

/// `<config dir>/testbed/defaults.kdl`, when the platform has a config dir
pub fn global_defaults_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("testbed").join(DEFAULTS_FILE))
}

/// Load `path` layered over the global defaults file, if one exists.
pub fn load(path: &Path) -> Result<LoadedEnvironment> {
    load_with_defaults(path, global_defaults_path().as_deref())
}

pub fn load_with_defaults(path: &Path, defaults: Option<&Path>) -> Result<LoadedEnvironment> {
    let root = project_root(path);
    let default_project = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("testbed");

    let mut env = EnvironmentDef::new(default_project);
    if let Some(defaults) = defaults.filter(|p| p.is_file()) {
        tracing::debug!(path = %defaults.display(), "applying global defaults");
        merge_into(&parser::read(defaults)?, &mut env)?;
    }
    merge_into(&parser::read(path)?, &mut env)?;

    tracing::info!(
        path = %path.display(),
        project = %env.project,
        images = env.images.len(),
        services = env.services.len(),
        "loaded environment definition"
    );

    Ok(LoadedEnvironment {
        path: path.to_path_buf(),
        root,
        env,
    })
}

/// Directory relative paths resolve against: the file's directory, or its
/// parent when the file lives in `.testbed/`.
fn project_root(path: &Path) -> PathBuf {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if dir.file_name().is_some_and(|n| n == PROJECT_DIR_NAME) {
        dir.parent().unwrap_or(dir).to_path_buf()
    } else {
        dir.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_local_file_wins_over_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("testbed.kdl"), "project \"a\"").unwrap();
        fs::write(dir.path().join("testbed.local.kdl"), "project \"b\"").unwrap();

        let found = find_environment_file(dir.path(), None).unwrap();
        assert!(found.ends_with("testbed.local.kdl"));
    }

    #[test]
    fn test_finds_file_in_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".testbed")).unwrap();
        fs::write(dir.path().join(".testbed/testbed.kdl"), "").unwrap();

        let found = find_environment_file(dir.path(), None).unwrap();
        assert!(found.ends_with(".testbed/testbed.kdl"));
        assert_eq!(project_root(&found), dir.path());
    }

    #[test]
    fn test_explicit_path_is_relative_to_start() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ci.kdl"), "").unwrap();

        let found = find_environment_file(dir.path(), Some(Path::new("ci.kdl"))).unwrap();
        assert_eq!(found, dir.path().join("ci.kdl"));

        let err = find_environment_file(dir.path(), Some(Path::new("absent.kdl"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { ref searched } if searched.len() == 1));
    }

    #[test]
    fn test_not_found_lists_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_environment_file(dir.path(), None).unwrap_err();
        match err {
            ConfigError::NotFound { searched } => assert_eq!(searched.len(), 4),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.kdl");
        fs::write(
            &defaults,
            r#"
            registry "ghcr.io/acme" tag="main"
            timeouts {
                build 600
                pull 30
            }
            "#,
        )
        .unwrap();
        let project = dir.path().join("testbed.kdl");
        fs::write(
            &project,
            r#"
            project "checkout"
            timeouts {
                build 900
            }
            "#,
        )
        .unwrap();

        let loaded = load_with_defaults(&project, Some(&defaults)).unwrap();
        assert_eq!(loaded.env.project, "checkout");
        assert_eq!(loaded.env.budgets.build, Duration::from_secs(900));
        assert_eq!(loaded.env.budgets.pull, Duration::from_secs(30));
        assert_eq!(
            loaded.env.registry.as_ref().map(|r| r.tag.as_str()),
            Some("main")
        );
        assert_eq!(loaded.root, dir.path());
    }

    #[test]
    fn test_project_defaults_to_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("payments");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("testbed.kdl"), "").unwrap();

        let loaded = load_with_defaults(&root.join("testbed.kdl"), None).unwrap();
        assert_eq!(loaded.env.project, "payments");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_global_defaults_follow_xdg_config_home() {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_var("XDG_CONFIG_HOME", Some(dir.path()), || {
            assert_eq!(
                global_defaults_path(),
                Some(dir.path().join("testbed").join("defaults.kdl"))
            );
        });
    }
}
