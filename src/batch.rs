//! Directory batch orchestration.
//!
//! Game updates ship directories of archives, not single files.  The batch
//! surface pairs entries by file name across two directories, filtered on
//! an extension, and runs one diff or apply job per pair.  Pairs run
//! sequentially — each job already saturates the worker pool — and a
//! per-file failure is recorded without aborting the rest of the batch.

use std::fs;
use std::path::{Path, PathBuf};

use crate::diff::{self, DiffOptions};
use crate::error::DeltaError;
use crate::patch::{self, ApplyOptions};
use crate::progress::Progress;

/// Extension appended to a source file name to form its patch name.
pub const PATCH_EXTENSION: &str = "bdp";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Only files with this extension are paired (no leading dot).
    pub extension: String,
    pub diff:      DiffOptions,
    pub apply:     ApplyOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            extension: "pak".into(),
            diff:      DiffOptions::default(),
            apply:     ApplyOptions::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Files diffed or patched successfully.
    pub processed: usize,
    /// Entries without a counterpart or with the wrong extension.
    pub skipped:   Vec<PathBuf>,
    pub failures:  Vec<(PathBuf, DeltaError)>,
}

impl BatchReport {
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Files in `dir` carrying `extension`, sorted by name so batch order (and
/// console output) is stable across runs.
fn matching_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, DeltaError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file()
            && path.extension().map_or(false, |e| e.eq_ignore_ascii_case(extension))
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap_or_default().to_string_lossy().into_owned()
}

/// Diff every `<name>.<ext>` present in both `old_dir` and `new_dir`,
/// writing `<name>.<ext>.bdp` files into `patch_dir`.
pub fn batch_diff(
    old_dir:   &Path,
    new_dir:   &Path,
    patch_dir: &Path,
    options:   &BatchOptions,
    progress:  Option<&dyn Progress>,
) -> Result<BatchReport, DeltaError> {
    fs::create_dir_all(patch_dir)?;
    let mut report = BatchReport::default();

    for new_path in matching_files(new_dir, &options.extension)? {
        let name = file_name(&new_path);
        let old_path = old_dir.join(&name);
        if !old_path.is_file() {
            report.skipped.push(new_path);
            continue;
        }

        let patch_path = patch_dir.join(format!("{name}.{PATCH_EXTENSION}"));
        match diff::create_diff(&old_path, &new_path, &patch_path, &options.diff, progress) {
            Ok(_) => report.processed += 1,
            Err(DeltaError::Cancelled) => return Err(DeltaError::Cancelled),
            Err(e) => report.failures.push((new_path, e)),
        }
    }
    Ok(report)
}

/// Apply every `<name>.bdp` in `patch_dir` to its `<name>` counterpart in
/// `old_dir`, writing results into `out_dir`.
pub fn batch_patch(
    old_dir:   &Path,
    patch_dir: &Path,
    out_dir:   &Path,
    options:   &BatchOptions,
    progress:  Option<&dyn Progress>,
) -> Result<BatchReport, DeltaError> {
    fs::create_dir_all(out_dir)?;
    let mut report = BatchReport::default();

    for patch_path in matching_files(patch_dir, PATCH_EXTENSION)? {
        // `<name>.pak.bdp` → `<name>.pak`.
        let target_name = patch_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let old_path = old_dir.join(&target_name);
        if !old_path.is_file() {
            report.skipped.push(patch_path);
            continue;
        }

        let out_path = out_dir.join(&target_name);
        match patch::apply_patch(&old_path, &patch_path, &out_path, &options.apply, progress) {
            Ok(_) => report.processed += 1,
            Err(DeltaError::Cancelled) => return Err(DeltaError::Cancelled),
            Err(e) => report.failures.push((patch_path, e)),
        }
    }
    Ok(report)
}
