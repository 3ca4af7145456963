//! Locating the table file when none is given on the command line.

use anyhow::{Context, Result};
use console::{style, Term};
use std::path::{Path, PathBuf};

use crate::PipelineError;

/// Table files in `dir` with the given extension, sorted by name.
///
/// Office lock files (`~$name`, `.~lock.name#`) are ignored.
pub fn find_candidates(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();

    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("~$") || name.starts_with(".~lock") {
            continue;
        }

        let matches = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches {
            candidates.push(path);
        }
    }

    candidates.sort();
    Ok(candidates)
}

/// Resolve the table to process.
///
/// An explicit path must exist. Otherwise the single candidate in `dir` is
/// used, or `choose` picks one (zero-based) when there are several.
pub fn resolve_table<F>(
    explicit: Option<&Path>,
    dir: &Path,
    extension: &str,
    choose: F,
) -> Result<PathBuf>
where
    F: FnOnce(&[PathBuf]) -> Result<usize>,
{
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(PipelineError::TableNotFound(path.to_path_buf()).into());
        }
        return Ok(path.to_path_buf());
    }

    let mut candidates = find_candidates(dir, extension)?;
    match candidates.len() {
        0 => Err(PipelineError::NoTableFound(extension.to_string()).into()),
        1 => Ok(candidates.remove(0)),
        count => {
            let index = choose(&candidates)?;
            if index >= count {
                return Err(PipelineError::InvalidSelection(format!(
                    "{} (expected 1-{})",
                    index + 1,
                    count
                ))
                .into());
            }
            Ok(candidates.swap_remove(index))
        }
    }
}

/// Parse a 1-based menu choice into a zero-based index
pub fn parse_selection(input: &str, count: usize) -> Result<usize> {
    let choice: usize = input
        .trim()
        .parse()
        .map_err(|_| PipelineError::InvalidSelection(input.trim().to_string()))?;

    if choice == 0 || choice > count {
        return Err(PipelineError::InvalidSelection(format!(
            "{} (expected 1-{})",
            choice, count
        ))
        .into());
    }

    Ok(choice - 1)
}

/// Ask the operator which candidate to use
pub fn prompt_selection(candidates: &[PathBuf]) -> Result<usize> {
    let term = Term::stderr();

    term.write_line(&format!("{}", style("Several table files found:").bold()))?;
    for (idx, path) in candidates.iter().enumerate() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        term.write_line(&format!("  {}. {}", idx + 1, name))?;
    }
    term.write_str("\nSelect a file number: ")?;

    let answer = term.read_line().context("Selection cancelled")?;
    parse_selection(&answer, candidates.len())
}
