//! Feature hashing.
//!
//! Maps every value of a categorical column to a bucket in `[1, K]` by hashing
//! its string form, so no vocabulary has to be learned or stored. The only
//! state is the modulus `K`, which is persisted in the metadata record so a
//! separate apply phase reproduces the same codes.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{
    ColumnId, DenseMatrix, DenseTarget, FloatKey, Frame, MetadataFrame, SparseBlockMut, Value,
};
use crate::encoder::{
    ApplyTask, EncoderError, Result, TransformInput, end_index, read_base, write_base,
};
use crate::stats::{self, Counter};

/// Reported in missing-value errors.
const PURPOSE: &str = "FeatureHash";

// ============================================================================
// Hash Function
// ============================================================================

/// Stable 32-bit string hash: `s[0]*31^(n-1) + ... + s[n-1]` over the UTF-16
/// code units of `key`, with wrapping arithmetic.
///
/// The result depends only on `key`: a build phase and a separate apply phase
/// (possibly on another host) must agree on every code.
#[inline]
pub fn hash_code(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Bucket of `key` under modulus `k`: `(hash(key) mod k) + 1`.
///
/// `%` keeps the sign of the hash, so a negative hash yields a code `<= 0`.
/// Dense output turns such codes into `NaN`; sparse output stores them as-is.
#[inline]
pub fn code(key: &str, k: i64) -> i64 {
    i64::from(hash_code(key)) % k + 1
}

#[inline]
fn dense_value(code: i64) -> f64 {
    if code >= 0 { code as f64 } else { f64::NAN }
}

// ============================================================================
// Encoder
// ============================================================================

/// Feature-hash encoder for one input column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureHashEncoder {
    column_id: ColumnId,
    /// Number of buckets `K`. `0` means unset.
    modulus: i64,
}

/// Placeholder bound to no column; only useful as a deserialization target.
impl Default for FeatureHashEncoder {
    fn default() -> Self {
        Self {
            column_id: ColumnId::INVALID,
            modulus: 0,
        }
    }
}

impl FeatureHashEncoder {
    pub fn new(column_id: ColumnId, modulus: i64) -> Self {
        Self { column_id, modulus }
    }

    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    pub fn modulus(&self) -> i64 {
        self.modulus
    }

    pub fn is_applicable(&self) -> bool {
        self.column_id.is_valid()
    }

    fn check_modulus(&self) -> Result<()> {
        if self.modulus > 0 {
            Ok(())
        } else {
            Err(EncoderError::ModulusUnset {
                column: self.column_id,
            })
        }
    }

    /// Zero-based input column, checked against the input width.
    fn input_column(&self, num_columns: usize) -> Result<usize> {
        match self.column_id.index() {
            Some(col) if col < num_columns => Ok(col),
            _ => Err(EncoderError::ColumnOutOfBounds {
                column: self.column_id,
                num_columns,
            }),
        }
    }

    #[inline]
    fn value_code(&self, value: &Value) -> i64 {
        match value {
            Value::Str(s) => code(s, self.modulus),
            other => code(&other.to_string(), self.modulus),
        }
    }

    #[inline]
    fn frame_code(&self, input: &Frame, row: usize, col: usize) -> Result<i64> {
        let value = input.get(row, col).ok_or(EncoderError::MissingValue {
            purpose: PURPOSE,
            row,
            column: self.column_id,
        })?;
        Ok(self.value_code(value))
    }

    /// Nothing to learn: the mapping is fully defined by `K`.
    pub fn build(&mut self, _input: &Frame) {}

    pub fn build_tasks<'a>(&'a self, _input: &'a Frame) -> Vec<Box<dyn ApplyTask + Send + 'a>> {
        Vec::new()
    }

    pub fn apply<T: DenseTarget>(
        &self,
        input: TransformInput<'_>,
        out: &mut T,
        output_col: usize,
        row_start: usize,
        blk: usize,
    ) -> Result<()> {
        match input {
            TransformInput::Frame(frame) => self.apply_frame(frame, out, output_col, row_start, blk),
            TransformInput::Matrix(matrix) => {
                self.apply_matrix(matrix, out, output_col, row_start, blk)
            }
        }
    }

    /// Hash frame rows `[row_start, row_start + blk)` into `out[.., output_col]`.
    ///
    /// Fails on the first missing cell; rows after it are left untouched.
    pub fn apply_frame<T: DenseTarget>(
        &self,
        input: &Frame,
        out: &mut T,
        output_col: usize,
        row_start: usize,
        blk: usize,
    ) -> Result<()> {
        self.check_modulus()?;
        let col = self.input_column(input.num_columns())?;
        let t0 = stats::start();
        for i in row_start..end_index(input.num_rows(), row_start, blk) {
            let code = self.frame_code(input, i, col)?;
            out.set(i, output_col, dense_value(code));
        }
        stats::record(Counter::FeatureHashApply, t0);
        Ok(())
    }

    /// Same as [`apply_frame`](Self::apply_frame) for numeric input, whose
    /// cells are always present. Keys are rendered by [`FloatKey`], so a
    /// numeric cell hashes like the same float in a frame.
    pub fn apply_matrix<T: DenseTarget>(
        &self,
        input: &DenseMatrix,
        out: &mut T,
        output_col: usize,
        row_start: usize,
        blk: usize,
    ) -> Result<()> {
        self.check_modulus()?;
        let col = self.input_column(input.num_cols())?;
        let t0 = stats::start();
        for i in row_start..end_index(input.num_rows(), row_start, blk) {
            let key = FloatKey(input.get(i, col)).to_string();
            out.set(i, output_col, dense_value(code(&key, self.modulus)));
        }
        stats::record(Counter::FeatureHashApply, t0);
        Ok(())
    }

    /// Sparse apply work unit over `out`. Only frame input is supported.
    pub fn sparse_task<'a>(
        &'a self,
        input: TransformInput<'a>,
        out: SparseBlockMut<'a>,
        output_col: usize,
        row_start: usize,
        blk: usize,
    ) -> Result<Box<dyn ApplyTask + Send + 'a>> {
        match input {
            TransformInput::Frame(frame) => Ok(Box::new(FeatureHashSparseApplyTask {
                encoder: self,
                input: frame,
                out,
                output_col,
                start_row: row_start,
                blk,
            })),
            TransformInput::Matrix(_) => Err(EncoderError::NotImplemented(
                "sparse feature hashing of numeric matrix input".to_string(),
            )),
        }
    }

    /// Adopt `other`'s modulus if this one is unset. A set modulus is never
    /// overwritten.
    ///
    /// # Panics
    /// If the two encoders belong to different columns.
    pub fn merge_at(&mut self, other: &FeatureHashEncoder) {
        assert_eq!(
            self.column_id, other.column_id,
            "cannot merge feature hash encoders of different columns"
        );
        if self.modulus == 0 && other.modulus != 0 {
            self.modulus = other.modulus;
        }
    }

    /// Write `K` as a decimal string into `meta[0, column_id - 1]`.
    pub fn export_metadata(&self, meta: &mut MetadataFrame) -> Result<()> {
        let Some(col) = self.column_id.index() else {
            return Ok(());
        };
        if col >= meta.num_columns() {
            return Err(EncoderError::ColumnOutOfBounds {
                column: self.column_id,
                num_columns: meta.num_columns(),
            });
        }
        meta.ensure_allocated_rows(1);
        meta.set(0, col, self.modulus.to_string());
        Ok(())
    }

    /// Read `K` back from `meta[0, column_id - 1]`. An absent or empty record
    /// leaves the encoder unchanged.
    pub fn import_metadata(&mut self, meta: Option<&MetadataFrame>) -> Result<()> {
        let Some(meta) = meta.filter(|m| m.num_rows() > 0) else {
            return Ok(());
        };
        let Some(col) = self.column_id.index() else {
            return Ok(());
        };
        if col >= meta.num_columns() {
            return Err(EncoderError::ColumnOutOfBounds {
                column: self.column_id,
                num_columns: meta.num_columns(),
            });
        }
        let raw = meta.get(0, col).unwrap_or_default();
        self.modulus = raw.parse().map_err(|e: std::num::ParseIntError| {
            EncoderError::MalformedMetadata {
                column: self.column_id,
                value: raw.to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!(column = %self.column_id, modulus = self.modulus, "feature hash modulus loaded");
        Ok(())
    }

    /// Base payload, then `K` as a big-endian `i64`.
    pub fn write_external<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_base(w, self.column_id)?;
        w.write_all(&self.modulus.to_be_bytes())
    }

    pub fn read_external<R: Read>(&mut self, r: &mut R) -> io::Result<()> {
        self.column_id = read_base(r)?;
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        self.modulus = i64::from_be_bytes(buf);
        Ok(())
    }
}

// ============================================================================
// Sparse Apply Task
// ============================================================================

/// Writes hash codes for a row chunk into pre-allocated sparse rows.
///
/// The code for a row goes into slot `column_id - 1` of the row's value
/// array, and `output_col` into the same slot of its index array. Rows are
/// never grown.
pub struct FeatureHashSparseApplyTask<'a> {
    encoder: &'a FeatureHashEncoder,
    input: &'a Frame,
    out: SparseBlockMut<'a>,
    output_col: usize,
    start_row: usize,
    blk: usize,
}

impl ApplyTask for FeatureHashSparseApplyTask<'_> {
    fn call(&mut self) -> Result<usize> {
        if !self.out.is_materialized() {
            return Ok(0);
        }
        self.encoder.check_modulus()?;
        let slot = self.encoder.input_column(self.input.num_columns())?;
        let end = end_index(self.input.num_rows(), self.start_row, self.blk);
        let block = self.out.row_range();
        if self.start_row < end && (self.start_row < block.start || end > block.end) {
            return Err(EncoderError::RowRangeOutsideBlock {
                rows: self.start_row..end,
                block,
            });
        }
        if !self.out.rows_allocated(self.start_row..end) {
            debug!(
                column = %self.encoder.column_id,
                rows = ?(self.start_row..end),
                "sparse rows not allocated, skipping"
            );
            return Ok(0);
        }

        let t0 = stats::start();
        let mut written = 0;
        for r in self.start_row..end {
            let code = self.encoder.frame_code(self.input, r, slot)?;
            let Some(row) = self.out.row_mut(r) else {
                continue;
            };
            if slot >= row.capacity() {
                return Err(EncoderError::SparseSlotOutOfBounds {
                    row: r,
                    slot,
                    capacity: row.capacity(),
                });
            }
            row.values_mut()[slot] = code as f64;
            row.indexes_mut()[slot] = self.output_col;
            written += 1;
        }
        stats::record(Counter::FeatureHashApply, t0);
        Ok(written)
    }
}

// ============================================================================
// Tests
// ============================================================================
