//! Input file resolution and static sharding across tasks.

use crate::error::{PipelineError, Result};
use std::ops::Range;
use std::path::PathBuf;
use tracing::{info, warn};

/// Expands a comma-separated list of glob patterns into the global file list.
///
/// Matches of each pattern are sorted; patterns keep their given order.
/// Every task of a job must see the same list for [`shard_range`] to
/// partition it.
pub fn resolve_input_paths(input_path: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in input_path.trim().split(',') {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        let entries = glob::glob(pattern).map_err(|e| PipelineError::InputPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let mut matched = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PipelineError::Io(e.into()))?;
            if path.is_file() {
                matched.push(path);
            }
        }
        if matched.is_empty() {
            warn!(pattern, "input pattern matched no files");
        }
        matched.sort();
        files.extend(matched);
    }
    info!(input_path, file_num = files.len(), "resolved input files");
    Ok(files)
}

/// Contiguous index range of shard `index` out of `num_shards` over `total` items.
///
/// The first `total % num_shards` shards get one extra item, so shard sizes
/// differ by at most one and the ranges cover `0..total` without overlap.
pub fn shard_range(total: usize, index: usize, num_shards: usize) -> Range<usize> {
    if num_shards == 0 || index >= num_shards {
        return 0..0;
    }
    let avg = total / num_shards;
    let rem = total % num_shards;
    let start = index * avg + rem.min(index);
    let end = (index + 1) * avg + rem.min(index + 1);
    start..end
}

/// Files assigned to task `index` out of `num_tasks`.
pub fn shard_files(files: &[PathBuf], index: usize, num_tasks: usize) -> &[PathBuf] {
    &files[shard_range(files.len(), index, num_tasks)]
}

/// Repeats the shard `epochs` times, keeping file order within each pass.
pub fn repeat_epochs(files: &[PathBuf], epochs: usize) -> Vec<PathBuf> {
    let mut repeated = Vec::with_capacity(files.len() * epochs);
    for _ in 0..epochs {
        repeated.extend_from_slice(files);
    }
    repeated
}
