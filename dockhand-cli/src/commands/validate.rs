//! Validate command

use anyhow::{Context, Result};
use colored::*;
use dockhand_core::compose::CompositionDescriptor;
use std::path::Path;

/// Validate a descriptor file and print the resolved start order
pub fn validate_descriptor(path: &Path) -> Result<()> {
    let descriptor = CompositionDescriptor::from_path(path)
        .with_context(|| format!("{} is not a valid descriptor", path.display()))?;

    println!("{}", "✓ Descriptor is valid".green().bold());
    println!("  Project: {}", descriptor.project.cyan());
    println!("  Network: {}", descriptor.network);

    println!("\n{}", "Start order:".bold());
    for (index, instance) in descriptor.instances.iter().enumerate() {
        let ports: Vec<String> = instance.ports.iter().map(ToString::to_string).collect();
        println!(
            "  {}. {} {}{}",
            index + 1,
            instance.service.bold(),
            instance.image.to_string().dimmed(),
            if ports.is_empty() {
                String::new()
            } else {
                format!(" ({})", ports.join(", "))
            }
        );
        if instance.is_stateful() {
            println!("       {}", "stateful; volumes are kept across recreates".yellow());
        }
        for binding in &instance.volumes {
            println!("       volume {}", binding.to_string().dimmed());
        }
    }

    Ok(())
}
