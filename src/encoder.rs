//! Shared column-encoder contract.
//!
//! Every encoder kind is a variant of [`ColumnEncoder`] and exposes the same
//! surface: a (possibly empty) build phase, dense apply over either input kind,
//! schedulable sparse apply tasks, partition merge, metadata export/import, and
//! a fixed-layout binary payload for shipping encoders to remote workers.

use std::io::{self, Read, Write};
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{ColumnId, DenseMatrix, DenseTarget, Frame, MetadataFrame, SparseBlockMut};
use crate::feature_hash::FeatureHashEncoder;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Missing Value encountered in input Frame for {purpose} (row {row}, column {column})")]
    MissingValue {
        purpose: &'static str,
        row: usize,
        column: ColumnId,
    },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("malformed metadata for column {column}: {value:?} ({reason})")]
    MalformedMetadata {
        column: ColumnId,
        value: String,
        reason: String,
    },

    #[error("modulus is unset for column {column}")]
    ModulusUnset { column: ColumnId },

    #[error("column {column} out of bounds for {num_columns} columns")]
    ColumnOutOfBounds { column: ColumnId, num_columns: usize },

    #[error("sparse row {row} has {capacity} slots, slot {slot} is out of bounds")]
    SparseSlotOutOfBounds {
        row: usize,
        slot: usize,
        capacity: usize,
    },

    #[error("task rows {rows:?} are not covered by output block {block:?}")]
    RowRangeOutsideBlock { rows: Range<usize>, block: Range<usize> },

    #[error("output is {rows}x{cols}, need at least {expected_rows}x{expected_cols}")]
    OutputShape {
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error("invalid transform spec: {0}")]
    InvalidSpec(String),

    #[error("unknown encoder kind tag: {0}")]
    UnknownEncoderKind(u8),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

pub type Result<T> = std::result::Result<T, EncoderError>;

// ============================================================================
// Inputs, Row Ranges, Tasks
// ============================================================================

/// The two input representations an encoder can read from.
#[derive(Debug, Clone, Copy)]
pub enum TransformInput<'a> {
    /// Typed, nullable tabular rows.
    Frame(&'a Frame),
    /// Already-numeric rows. Cells are never missing.
    Matrix(&'a DenseMatrix),
}

impl TransformInput<'_> {
    pub fn num_rows(&self) -> usize {
        match self {
            TransformInput::Frame(f) => f.num_rows(),
            TransformInput::Matrix(m) => m.num_rows(),
        }
    }

    pub fn num_columns(&self) -> usize {
        match self {
            TransformInput::Frame(f) => f.num_columns(),
            TransformInput::Matrix(m) => m.num_cols(),
        }
    }
}

/// Exclusive end of the row chunk starting at `start`. `blk == 0` means
/// "to the last row".
#[inline]
pub fn end_index(num_rows: usize, start: usize, blk: usize) -> usize {
    if blk == 0 {
        num_rows
    } else {
        num_rows.min(start.saturating_add(blk))
    }
}

/// A schedulable unit of work produced by an encoder.
///
/// Tasks run to completion on whatever worker picks them up and report the
/// number of cells they wrote.
pub trait ApplyTask {
    fn call(&mut self) -> Result<usize>;
}

// ============================================================================
// Encoder Kinds
// ============================================================================

/// Tag written ahead of each encoder's binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncoderKind {
    FeatureHash = 0,
}

impl TryFrom<u8> for EncoderKind {
    type Error = EncoderError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(EncoderKind::FeatureHash),
            other => Err(EncoderError::UnknownEncoderKind(other)),
        }
    }
}

/// Closed set of column encoders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnEncoder {
    FeatureHash(FeatureHashEncoder),
}

impl ColumnEncoder {
    pub fn kind(&self) -> EncoderKind {
        match self {
            ColumnEncoder::FeatureHash(_) => EncoderKind::FeatureHash,
        }
    }

    pub fn column_id(&self) -> ColumnId {
        match self {
            ColumnEncoder::FeatureHash(e) => e.column_id(),
        }
    }

    pub fn is_applicable(&self) -> bool {
        self.column_id().is_valid()
    }

    pub fn build(&mut self, input: &Frame) {
        match self {
            ColumnEncoder::FeatureHash(e) => e.build(input),
        }
    }

    /// Work units the scheduler must run before metadata is final.
    pub fn build_tasks<'a>(&'a self, input: &'a Frame) -> Vec<Box<dyn ApplyTask + Send + 'a>> {
        match self {
            ColumnEncoder::FeatureHash(e) => e.build_tasks(input),
        }
    }

    /// Encode rows `[row_start, row_start + blk)` into `out[.., output_col]`.
    pub fn apply<T: DenseTarget>(
        &self,
        input: TransformInput<'_>,
        out: &mut T,
        output_col: usize,
        row_start: usize,
        blk: usize,
    ) -> Result<()> {
        match self {
            ColumnEncoder::FeatureHash(e) => e.apply(input, out, output_col, row_start, blk),
        }
    }

    pub fn sparse_task<'a>(
        &'a self,
        input: TransformInput<'a>,
        out: SparseBlockMut<'a>,
        output_col: usize,
        row_start: usize,
        blk: usize,
    ) -> Result<Box<dyn ApplyTask + Send + 'a>> {
        match self {
            ColumnEncoder::FeatureHash(e) => e.sparse_task(input, out, output_col, row_start, blk),
        }
    }

    /// Fold a partition-local encoder for the same column into this one.
    pub fn merge_at(&mut self, other: &ColumnEncoder) {
        match (self, other) {
            (ColumnEncoder::FeatureHash(a), ColumnEncoder::FeatureHash(b)) => a.merge_at(b),
        }
    }

    pub fn export_metadata(&self, meta: &mut MetadataFrame) -> Result<()> {
        match self {
            ColumnEncoder::FeatureHash(e) => e.export_metadata(meta),
        }
    }

    pub fn import_metadata(&mut self, meta: Option<&MetadataFrame>) -> Result<()> {
        match self {
            ColumnEncoder::FeatureHash(e) => e.import_metadata(meta),
        }
    }

    /// Kind tag, then the variant's payload.
    pub fn write_external<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.kind() as u8])?;
        match self {
            ColumnEncoder::FeatureHash(e) => e.write_external(w),
        }
    }

    pub fn read_external<R: Read>(r: &mut R) -> Result<Self> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        match EncoderKind::try_from(tag[0])? {
            EncoderKind::FeatureHash => {
                let mut e = FeatureHashEncoder::default();
                e.read_external(r)?;
                Ok(ColumnEncoder::FeatureHash(e))
            }
        }
    }
}

impl From<FeatureHashEncoder> for ColumnEncoder {
    fn from(e: FeatureHashEncoder) -> Self {
        ColumnEncoder::FeatureHash(e)
    }
}

// ============================================================================
// Base Payload
// ============================================================================

/// Fields common to every encoder kind: the column id as a big-endian `i32`.
pub(crate) fn write_base<W: Write>(w: &mut W, column_id: ColumnId) -> io::Result<()> {
    w.write_all(&column_id.0.to_be_bytes())
}

pub(crate) fn read_base<R: Read>(r: &mut R) -> io::Result<ColumnId> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(ColumnId(i32::from_be_bytes(buf)))
}
