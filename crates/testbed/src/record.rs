//! Result records written by `up` and read back by `down`

use anyhow::Context;
use std::path::{Path, PathBuf};
use testbed_core::ProvisioningResult;

pub fn write(path: &Path, result: &ProvisioningResult) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
    tracing::debug!(path = %path.display(), "wrote result record");
    Ok(())
}

pub fn read(path: &Path) -> anyhow::Result<ProvisioningResult> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read record {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("{} is not a result record", path.display()))
}

/// Most recently modified `*.json` in `dir`
pub fn latest(dir: &Path) -> anyhow::Result<PathBuf> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("no records in {} (run `testbed up` first)", dir.display()))?;

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| {
            let modified = path.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
        .with_context(|| format!("no records in {} (run `testbed up` first)", dir.display()))
}
