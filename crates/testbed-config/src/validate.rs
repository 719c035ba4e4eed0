//! Static checks run before any external call

use crate::LoadedEnvironment;
use crate::error::{ConfigError, Result};
use std::collections::{BTreeMap, BTreeSet};
use testbed_core::synth::{ManifestTemplate, service_values};
use testbed_core::{PatchValue, ReadyTarget, ServiceKind};

/// Fail with every problem found, or succeed when there are none.
pub fn validate(loaded: &LoadedEnvironment) -> Result<()> {
    let problems = problems(loaded);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(problems))
    }
}

pub fn problems(loaded: &LoadedEnvironment) -> Vec<String> {
    let env = &loaded.env;
    let root = &loaded.root;
    let mut problems = Vec::new();

    duplicates("image", env.images.iter().map(|i| i.service.as_str()), &mut problems);
    duplicates("service", env.services.iter().map(|s| s.name.as_str()), &mut problems);
    duplicates("patch", env.patches.iter().map(|p| p.name.as_str()), &mut problems);

    let placeholder_images: BTreeMap<String, String> = env
        .images
        .iter()
        .map(|i| (i.service.clone(), format!("<{}>", i.target)))
        .collect();

    for image in &env.images {
        if let Some(definition) = &image.definition
            && !root.join(definition).is_file()
        {
            problems.push(format!(
                "image '{}': dockerfile {} does not exist",
                image.service,
                definition.display()
            ));
        }
        if let Some(context) = &image.context
            && !root.join(context).is_dir()
        {
            problems.push(format!(
                "image '{}': context {} is not a directory",
                image.service,
                context.display()
            ));
        }
    }

    let mut host_ports = BTreeMap::new();
    for service in &env.services {
        let name = &service.name;

        for ready in &service.ready {
            match (&ready.target, service.kind) {
                (ReadyTarget::Selector { .. }, ServiceKind::Container) => problems.push(format!(
                    "service '{}': selector readiness needs a manifest service",
                    name
                )),
                (ReadyTarget::Container, ServiceKind::Manifest) => problems.push(format!(
                    "service '{}': container readiness needs a container service",
                    name
                )),
                _ => {}
            }
            if ready.interval.is_zero() || ready.deadline < ready.interval {
                problems.push(format!(
                    "service '{}': readiness deadline must be at least one non-zero interval",
                    name
                ));
            }
        }

        for port in &service.ports {
            if let Some(other) = host_ports.insert(port.host, name.as_str()) {
                problems.push(format!(
                    "service '{}': host port {} already used by '{}'",
                    name, port.host, other
                ));
            }
        }

        match service.kind {
            ServiceKind::Container => {
                if service.image.is_none() {
                    problems.push(format!("service '{}': container service needs an image", name));
                }
                if service.manifest.is_some() {
                    problems.push(format!(
                        "service '{}': container service cannot have a manifest",
                        name
                    ));
                }
            }
            ServiceKind::Manifest => {
                if env.cluster.is_none() {
                    problems.push(format!(
                        "service '{}': manifest services need a cluster node",
                        name
                    ));
                }
                let Some(manifest) = &service.manifest else {
                    problems.push(format!("service '{}': manifest path is missing", name));
                    continue;
                };
                let path = root.join(manifest);
                let template = match ManifestTemplate::from_file(&path) {
                    Ok(template) => template,
                    Err(e) => {
                        problems.push(format!("service '{}': {}", name, e));
                        continue;
                    }
                };
                let values = service_values(env, service, "run", &placeholder_images);
                match template.missing(&values) {
                    Ok(missing) => {
                        for key in missing {
                            if let Some(image) = key.strip_prefix("image_") {
                                problems.push(format!(
                                    "service '{}': {} references unknown image '{}'",
                                    name,
                                    manifest.display(),
                                    image
                                ));
                            } else {
                                problems.push(format!(
                                    "service '{}': placeholder '{}' in {} has no value",
                                    name,
                                    key,
                                    manifest.display()
                                ));
                            }
                        }
                    }
                    Err(e) => problems.push(format!("service '{}': {}", name, e)),
                }
            }
        }
    }

    let manifest_tiers: BTreeSet<u32> = env
        .services
        .iter()
        .filter(|s| s.kind == ServiceKind::Manifest)
        .map(|s| s.tier)
        .collect();

    for patch in &env.patches {
        let name = &patch.name;
        if env.cluster.is_none() {
            problems.push(format!("patch '{}': patches need a cluster node", name));
        }
        if !patch.path.starts_with('/') {
            problems.push(format!(
                "patch '{}': path '{}' must be a JSON pointer starting with '/'",
                name, patch.path
            ));
        }
        if manifest_tiers.first().is_none_or(|lowest| patch.tier < *lowest) {
            problems.push(format!(
                "patch '{}': tier {} runs before any manifest is applied",
                name, patch.tier
            ));
        }
        if let PatchValue::File { path, .. } = &patch.value
            && !root.join(path).is_file()
        {
            problems.push(format!(
                "patch '{}': value file {} does not exist",
                name,
                path.display()
            ));
        }
    }

    problems
}

fn duplicates<'a>(what: &str, names: impl Iterator<Item = &'a str>, problems: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            problems.push(format!("{} '{}' is declared more than once", what, name));
        }
    }
}
