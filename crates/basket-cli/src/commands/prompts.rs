//! Prompts-related command implementations

use anyhow::Result;
use basket_core::prompts::default_prompts_dir;
use basket_core::PromptLibrary;

/// List all available prompts and their override status
pub fn cmd_prompts_list() -> Result<()> {
    let mut library = PromptLibrary::new();
    let prompts = library.list();

    println!("Available Prompts:\n");

    println!(
        "{:<25} {:>7}  {:<20}  OVERRIDE",
        "ID", "VERSION", "TASK TYPE"
    );
    println!("{}", "-".repeat(70));

    for info in prompts {
        let override_status = if info.has_override {
            "✓ Custom"
        } else {
            "Default"
        };

        println!(
            "{:<25} {:>7}  {:<20}  {}",
            info.id, info.version, info.task_type, override_status
        );
    }

    println!();
    println!(
        "Override directory: {}",
        default_prompts_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not available)".to_string())
    );

    Ok(())
}
