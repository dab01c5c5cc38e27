//! Fixed-size batch assembly with remainder carry-over.
//!
//! A [`BatchAssembler`] is owned by a single worker. Every decoded file is
//! pushed through it in the order the worker pulled the files:
//!
//! ```text
//!   file rows:  [ full batch | full batch | ... | tail (< B) ]
//!                     |            |                  |
//!                     v            v                  v
//!                  emitted      emitted     remainder ++ tail
//!                                                     |
//!                              m > B: emit first B, keep the rest
//!                              m = B: emit all, keep nothing
//!                              m < B: keep all
//! ```
//!
//! The assembler does no I/O and holds no shared state, so it can be tested
//! directly without any worker or queue machinery.

use crate::batch::Batch;
use crate::columns::ColumnSlice;
use crate::error::{PipelineError, Result};

/// Turns decoded files into batches of exactly `batch_size` rows plus a
/// carried remainder of fewer than `batch_size` rows.
#[derive(Debug)]
pub struct BatchAssembler {
    batch_size: usize,
    remainder: ColumnSlice,
}

impl BatchAssembler {
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            batch_size,
            remainder: ColumnSlice::default(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of rows currently carried over.
    pub fn remainder_rows(&self) -> usize {
        self.remainder.num_rows()
    }

    /// Assembles one file's rows.
    ///
    /// Returns the full batches cut from the file in ascending row order,
    /// followed by at most one batch built from the carried remainder and the
    /// file's tail.
    ///
    /// # Errors
    /// Returns [`PipelineError::CorruptInput`] if any ragged field violates
    /// `sum(lengths) == len(values)`. The remainder is left untouched in that case.
    pub fn push(&mut self, slice: ColumnSlice) -> Result<Vec<Batch>> {
        slice.validate()?;

        let b = self.batch_size;
        let n = slice.num_rows();
        let full = n / b;
        let mut batches = Vec::with_capacity(full + 1);

        {
            let cutter = slice.cutter();
            for i in 0..full {
                batches.push(Batch::from_slice(cutter.cut(i * b..(i + 1) * b))?);
            }
        }

        if n % b > 0 {
            let mut head = slice;
            let tail = head.split_off(full * b);
            drop(head);

            let mut combined = std::mem::take(&mut self.remainder);
            combined.append(tail)?;

            let m = combined.num_rows();
            if m > b {
                let rest = combined.split_off(b);
                batches.push(Batch::from_slice(combined)?);
                self.remainder = rest;
            } else if m == b {
                batches.push(Batch::from_slice(combined)?);
            } else {
                self.remainder = combined;
            }
        }

        debug_assert!(self.remainder.num_rows() < b);
        Ok(batches)
    }

    /// Takes the carried remainder, leaving the assembler empty.
    pub fn finish(&mut self) -> Option<ColumnSlice> {
        if self.remainder.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.remainder))
    }

    /// Takes the carried remainder as a final short batch.
    pub fn flush(&mut self) -> Result<Option<Batch>> {
        self.finish().map(Batch::from_slice).transpose()
    }
}
