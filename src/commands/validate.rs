// src/commands/validate.rs

//! Validate command - check a formula without installing it

use anyhow::Result;
use pantry::{parse_formula_file, validate_formula};
use std::path::Path;

pub fn cmd_validate(recipe: &Path) -> Result<()> {
    println!("Reading formula: {}", recipe.display());
    let formula = parse_formula_file(recipe)?;
    let warnings = validate_formula(&formula)?;

    println!(
        "Formula: {} ({} resource(s), {} install step(s))",
        formula.display_name(),
        formula.resources.len(),
        formula.install.len()
    );
    for warning in &warnings {
        println!("Warning: {}", warning);
    }

    if warnings.is_empty() {
        println!("[OK] No issues found");
    } else {
        println!("[OK] {} warning(s)", warnings.len());
    }
    Ok(())
}
