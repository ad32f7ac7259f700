//! Report display command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use sudoku_eval::SudokuReport;

pub fn run(input: PathBuf) -> Result<()> {
    let report = SudokuReport::read_json(&input)
        .with_context(|| format!("Failed to read report from {}", input.display()))?;

    println!("{report}");
    println!("Workers: {}", report.world_size);
    println!("Unscored batches (primary): {}", report.unscored_batches);
    println!("Generated: {}", report.timestamp.to_rfc3339());
    Ok(())
}
