//! Grouped view of a batch for downstream consumers.
//!
//! Training and serving code reads a batch as three groups: the aggregated
//! `feature` pair, the labels, and the passthrough (reserve) columns. Feature
//! ids can optionally be folded into a fixed number of hash buckets.

use crate::batch::Batch;
use crate::columns::{DenseArray, RaggedField};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    pub num_rows: usize,
    pub feature: RaggedField,
    pub labels: BTreeMap<String, Vec<f32>>,
    pub reserve: BTreeMap<String, DenseArray>,
}

impl InputRecord {
    /// Builds a record from a batch.
    ///
    /// With `num_buckets`, every feature value `v` becomes `v.rem_euclid(num_buckets)`.
    pub fn from_batch(batch: Batch, num_buckets: Option<u64>) -> Self {
        let num_rows = batch.num_rows();
        let (labels, mut feature, reserve) = batch.into_parts();
        if let Some(buckets) = num_buckets {
            feature.fold_into_buckets(buckets);
        }
        Self {
            num_rows,
            feature,
            labels: labels.into_iter().collect(),
            reserve: reserve.into_iter().collect(),
        }
    }
}

impl From<Batch> for InputRecord {
    fn from(batch: Batch) -> Self {
        Self::from_batch(batch, None)
    }
}
