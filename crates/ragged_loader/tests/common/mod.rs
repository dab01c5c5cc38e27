#![allow(dead_code)]

use ragged_loader::{Batch, PipelineConfig, PipelineConfigBuilder};

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, ListArray, StringArray};
use arrow::datatypes::{Float32Type, Int32Type, Int64Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Writes a Parquet file whose rows carry the ids `start..start+rows`:
/// - `click`: `list<float>` holding the id
/// - `ids`: `list<int64>` with `id % 4` copies of the id
/// - `tags`: `list<int32>` holding `id % 7`
/// - `score`: plain `double`, the id divided by 2
/// - `sid`: string `row-<id>`
pub fn write_parquet(path: &Path, start: u64, rows: usize) -> Result<PathBuf> {
    let ids: Vec<u64> = (start..start + rows as u64).collect();

    let click = ListArray::from_iter_primitive::<Float32Type, _, _>(
        ids.iter().map(|&i| Some(vec![Some(i as f32)])),
    );
    let ragged = ListArray::from_iter_primitive::<Int64Type, _, _>(
        ids.iter()
            .map(|&i| Some(vec![Some(i as i64); (i % 4) as usize])),
    );
    let tags = ListArray::from_iter_primitive::<Int32Type, _, _>(
        ids.iter().map(|&i| Some(vec![Some((i % 7) as i32)])),
    );
    let score = Float64Array::from_iter_values(ids.iter().map(|&i| i as f64 / 2.0));
    let sid = StringArray::from_iter_values(ids.iter().map(|i| format!("row-{}", i)));

    let batch = RecordBatch::try_from_iter(vec![
        ("click", Arc::new(click) as ArrayRef),
        ("ids", Arc::new(ragged) as ArrayRef),
        ("tags", Arc::new(tags) as ArrayRef),
        ("score", Arc::new(score) as ArrayRef),
        ("sid", Arc::new(sid) as ArrayRef),
    ])?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(path.to_path_buf())
}

/// Writes one file per entry of `sizes` into `dir`, with ids continuing
/// across files. Returns the paths in file order.
pub fn write_files(dir: &Path, sizes: &[usize]) -> Result<Vec<PathBuf>> {
    let mut next = 0u64;
    let mut paths = Vec::with_capacity(sizes.len());
    for (i, &rows) in sizes.iter().enumerate() {
        let path = dir.join(format!("part-{:05}.parquet", i));
        paths.push(write_parquet(&path, next, rows)?);
        next += rows as u64;
    }
    Ok(paths)
}

/// Config reading the fixture columns, with short timeouts for tests.
pub fn fixture_config(batch_size: usize) -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .batch_size(batch_size)
        .label_fields(["click"])
        .effective_fields(["ids", "tags"])
        .put_timeout(Duration::from_millis(20))
        .poll_timeout(Duration::from_millis(20))
        .read_batch_size(64)
}

/// Row ids of a batch, recovered from the `click` label.
pub fn batch_ids(batch: &Batch) -> Vec<u64> {
    batch
        .label("click")
        .map(|labels| labels.iter().map(|&v| v as u64).collect())
        .unwrap_or_default()
}

/// Checks that a fixture batch has consistent columns.
pub fn check_batch(batch: &Batch) {
    let rows = batch.num_rows();
    let feature = batch.feature();
    assert_eq!(feature.lengths_sum(), feature.values().len() as i64);
    assert_eq!(feature.num_rows(), rows * batch.feature_fields().len());

    let ids = batch_ids(batch);
    let expected: Vec<i32> = ids.iter().map(|&i| (i % 4) as i32).collect();
    assert_eq!(&feature.lengths()[..rows], expected.as_slice());
}
