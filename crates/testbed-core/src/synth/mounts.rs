//! Mount injection into a kind cluster config
//!
//! Works on the document text so comments and layout of the base config
//! survive. The control-plane node gets an `extraMounts` list:
//!
//! 1. appended to an existing `extraMounts:` key of that node, else
//! 2. inserted right before the node's `extraPortMappings:` key, else
//! 3. inserted right after the `- role: control-plane` line.
//!
//! The result is parsed once more to make sure it is still valid YAML.

use crate::error::SynthError;
use crate::model::MountDef;

/// Section the mounts are inserted in front of
pub const MOUNT_ANCHOR: &str = "extraPortMappings:";
/// Node role whose block receives the mounts
pub const MOUNT_NODE_ROLE: &str = "control-plane";

const MOUNTS_KEY: &str = "extraMounts:";

/// Minimal single-node config used when the environment names no base config
pub const DEFAULT_CLUSTER_CONFIG: &str = "\
kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
nodes:
  - role: control-plane
";

pub fn inject_mounts(document: &str, mounts: &[MountDef]) -> Result<String, SynthError> {
    validate(document)?;
    if mounts.is_empty() {
        return Ok(document.to_string());
    }

    let mut lines: Vec<String> = document.lines().map(str::to_string).collect();
    let role_line = format!("- role: {}", MOUNT_NODE_ROLE);

    let role = lines.iter().position(|l| l.trim() == role_line);
    let (block_start, block_end, key_indent) = match role {
        Some(idx) => {
            let dash_indent = indent_of(&lines[idx]);
            let end = lines[idx + 1..]
                .iter()
                .position(|l| !l.trim().is_empty() && indent_of(l) <= dash_indent)
                .map_or(lines.len(), |p| idx + 1 + p);
            let key_indent = lines[idx + 1..end]
                .iter()
                .find(|l| !l.trim().is_empty())
                .map_or(dash_indent + 2, |l| indent_of(l));
            (idx + 1, end, key_indent)
        }
        None => (0, lines.len(), 0),
    };

    let find_key = |lines: &[String], key: &str| {
        (block_start..block_end).find(|&i| {
            let line = &lines[i];
            line.trim_start().starts_with(key)
                && (role.is_none() || indent_of(line) == key_indent)
        })
    };

    if role.is_some()
        && let Some(idx) = find_key(&lines, MOUNTS_KEY)
    {
        append_to_existing(&mut lines, idx, block_end, mounts)?;
    } else if let Some(idx) = find_key(&lines, MOUNT_ANCHOR) {
        let indent = indent_of(&lines[idx]);
        let block = render_block(indent, mounts);
        lines.splice(idx..idx, block);
    } else if let Some(idx) = role {
        let block = render_block(key_indent, mounts);
        lines.splice(idx + 1..idx + 1, block);
    } else {
        return Err(SynthError::AnchorNotFound {
            anchor: MOUNT_ANCHOR.to_string(),
            role: MOUNT_NODE_ROLE.to_string(),
        });
    }

    let mut out = lines.join("\n");
    if document.ends_with('\n') {
        out.push('\n');
    }
    validate(&out)?;
    tracing::debug!(mounts = mounts.len(), "injected cluster mounts");
    Ok(out)
}

/// Append entries after the last item of an existing `extraMounts:` list.
fn append_to_existing(
    lines: &mut Vec<String>,
    key_idx: usize,
    block_end: usize,
    mounts: &[MountDef],
) -> Result<(), SynthError> {
    let key_indent = indent_of(&lines[key_idx]);
    let inline = lines[key_idx].trim()[MOUNTS_KEY.len()..].trim().to_string();
    match inline.as_str() {
        "" => {}
        "[]" => lines[key_idx] = format!("{}{}", " ".repeat(key_indent), MOUNTS_KEY),
        _ => {
            return Err(SynthError::InvalidDocument(format!(
                "inline '{} {}' cannot be extended",
                MOUNTS_KEY, inline
            )));
        }
    }

    let mut last = key_idx;
    let mut item_indent = None;
    for (i, line) in lines.iter().enumerate().take(block_end).skip(key_idx + 1) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let indent = indent_of(line);
        let belongs = indent > key_indent || (indent == key_indent && trimmed.starts_with("- "));
        if !belongs {
            break;
        }
        if item_indent.is_none() {
            item_indent = Some(indent);
        }
        last = i;
    }

    let items = render_items(item_indent.unwrap_or(key_indent), mounts);
    lines.splice(last + 1..last + 1, items);
    Ok(())
}

fn render_block(indent: usize, mounts: &[MountDef]) -> Vec<String> {
    let mut block = vec![format!("{}{}", " ".repeat(indent), MOUNTS_KEY)];
    block.extend(render_items(indent, mounts));
    block
}

fn render_items(indent: usize, mounts: &[MountDef]) -> Vec<String> {
    let pad = " ".repeat(indent);
    mounts
        .iter()
        .flat_map(|m| {
            [
                format!("{}- hostPath: {}", pad, quote(&m.host_path.to_string_lossy())),
                format!("{}  containerPath: {}", pad, quote(&m.container_path)),
                format!("{}  readOnly: {}", pad, m.read_only),
            ]
        })
        .collect()
}

/// JSON string literals are valid YAML double-quoted scalars
fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn validate(document: &str) -> Result<(), SynthError> {
    serde_yaml::from_str::<serde_yaml::Value>(document)
        .map(|_| ())
        .map_err(|e| SynthError::InvalidDocument(e.to_string()))
}
