use colored::Colorize;
use std::path::Path;

pub fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", "Validating environment definition...".blue());

    let loaded = crate::setup::load_environment(file)?;
    println!("File: {}", loaded.path.display().to_string().cyan());

    let problems = testbed_config::problems(&loaded);
    if !problems.is_empty() {
        eprintln!();
        eprintln!("{}", "✗ Environment definition has problems".red().bold());
        for problem in &problems {
            eprintln!("  - {}", problem);
        }
        std::process::exit(1);
    }

    let env = &loaded.env;
    println!("{}", "✓ Environment definition is valid".green().bold());
    println!();
    println!("Summary:");
    println!("  project: {}", env.project.cyan());
    if let Some(cluster) = &env.cluster {
        println!("  cluster: {} ({} mounts)", cluster.name.cyan(), cluster.mounts.len());
    }
    println!("  images: {}", env.images.len());
    for image in &env.images {
        println!("    - {} ({})", image.service.cyan(), image.target);
    }
    println!("  services: {}", env.services.len());
    for service in &env.services {
        println!(
            "    - {} ({}, tier {})",
            service.name.cyan(),
            service.kind,
            service.tier
        );
    }
    if !env.patches.is_empty() {
        println!("  patches: {}", env.patches.len());
    }
    Ok(())
}
