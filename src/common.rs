//! Common types shared by the column encoders: column ids, the typed input
//! frame, dense and sparse output matrices, and the metadata record.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

// ============================================================================
// Index NewTypes
// ============================================================================

/// 1-based ordinal of an input column.
///
/// [`ColumnId::INVALID`] marks a placeholder encoder that has not been bound to
/// a column yet (e.g. a deserialization target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(pub i32);

impl ColumnId {
    pub const INVALID: ColumnId = ColumnId(-1);

    /// Whether this id refers to a real column.
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }

    /// Zero-based column position, or `None` for an invalid id.
    pub fn index(self) -> Option<usize> {
        self.is_valid().then(|| self.0 as usize - 1)
    }
}

impl Default for ColumnId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Frame (typed tabular input)
// ============================================================================

/// Storage type of a frame column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    String = 0,
    Int64 = 1,
    Float64 = 2,
    Boolean = 3,
}

/// A single non-null frame cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::String,
            Value::Int(_) => ValueType::Int64,
            Value::Float(_) => ValueType::Float64,
            Value::Bool(_) => ValueType::Boolean,
        }
    }
}

/// String form of a cell. Floats are rendered through [`FloatKey`].
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{}", FloatKey(*v)),
            Value::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// An `f64` rendered like the JVM's `Double.toString`: at least one fractional
/// digit (`1.0`), scientific form `d.dddE±n` outside `[1e-3, 1e7)`, and
/// `NaN`/`Infinity` for non-finite values. Frames written by JVM pipelines
/// therefore hash numeric cells to the same buckets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatKey(pub f64);

impl fmt::Display for FloatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if v.is_nan() {
            return f.write_str("NaN");
        }
        if v.is_infinite() {
            return f.write_str(if v > 0.0 { "Infinity" } else { "-Infinity" });
        }
        let abs = v.abs();
        if abs == 0.0 || (1e-3..1e7).contains(&abs) {
            return if v.fract() == 0.0 {
                write!(f, "{v:.1}")
            } else {
                write!(f, "{v}")
            };
        }
        // `{:e}` yields the shortest digits, e.g. `1e7` or `1.25e-5`.
        let sci = format!("{v:e}");
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        if mantissa.contains('.') {
            write!(f, "{mantissa}E{exponent}")
        } else {
            write!(f, "{mantissa}.0E{exponent}")
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameColumn {
    pub name: String,
    pub vtype: ValueType,
    /// One entry per row; `None` is a missing value.
    pub values: Vec<Option<Value>>,
}

impl FrameColumn {
    pub fn new(name: impl Into<String>, vtype: ValueType, values: Vec<Option<Value>>) -> Self {
        Self {
            name: name.into(),
            vtype,
            values,
        }
    }

    /// Build a string column from optional string slices.
    pub fn strings<'s>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = Option<&'s str>>,
    ) -> Self {
        let values = values.into_iter().map(|v| v.map(Value::from)).collect();
        Self::new(name, ValueType::String, values)
    }
}

/// Column-major table of typed, nullable cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<FrameColumn>,
    num_rows: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column.
    ///
    /// # Panics
    /// If the frame already has columns and `column` has a different row count.
    pub fn push_column(&mut self, column: FrameColumn) {
        if self.columns.is_empty() {
            self.num_rows = column.values.len();
        } else {
            assert_eq!(
                column.values.len(),
                self.num_rows,
                "column '{}' has {} rows, frame has {}",
                column.name,
                column.values.len(),
                self.num_rows,
            );
        }
        self.columns.push(column);
    }

    pub fn with_column(mut self, column: FrameColumn) -> Self {
        self.push_column(column);
        self
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[FrameColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Zero-based position of the column called `name`.
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cell at `(row, col)` (both zero-based), `None` if missing.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<&Value> {
        self.columns[col].values[row].as_ref()
    }
}

// ============================================================================
// Dense Output
// ============================================================================

/// Anything a dense apply can write cells into. Rows are absolute indices.
pub trait DenseTarget {
    fn set(&mut self, row: usize, col: usize, value: f64);
}

/// Row-major dense `f64` matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix {
    num_rows: usize,
    num_cols: usize,
    values: Vec<f64>,
}

impl DenseMatrix {
    /// Zero-filled `num_rows x num_cols` matrix.
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self {
            num_rows,
            num_cols,
            values: vec![0.0; num_rows * num_cols],
        }
    }

    /// Build from row vectors.
    ///
    /// # Panics
    /// If the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let num_rows = rows.len();
        let num_cols = rows.first().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(num_rows * num_cols);
        for (i, row) in rows.into_iter().enumerate() {
            assert_eq!(row.len(), num_cols, "row {i} has {} columns, expected {num_cols}", row.len());
            values.extend(row);
        }
        Self {
            num_rows,
            num_cols,
            values,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Raw row-major buffer.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.num_cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.num_cols..(row + 1) * self.num_cols]
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.num_rows).map(|r| self.get(r, col)).collect()
    }

    /// Split the matrix into disjoint blocks of `blk` rows (the last block may
    /// be shorter). `blk == 0` yields a single block covering every row.
    ///
    /// Each block borrows its own slice of the buffer, so blocks can be filled
    /// concurrently without locking.
    pub fn row_blocks_mut(&mut self, blk: usize) -> Vec<DenseBlockMut<'_>> {
        let rows_per_block = if blk == 0 { self.num_rows.max(1) } else { blk };
        let num_cols = self.num_cols;
        if num_cols == 0 {
            return Vec::new();
        }
        self.values
            .chunks_mut(rows_per_block * num_cols)
            .enumerate()
            .map(|(i, chunk)| DenseBlockMut {
                row_offset: i * rows_per_block,
                num_rows: chunk.len() / num_cols,
                num_cols,
                values: chunk,
            })
            .collect()
    }
}

impl DenseTarget for DenseMatrix {
    #[inline]
    fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.num_cols + col] = value;
    }
}

/// Mutable view over a contiguous range of rows of a [`DenseMatrix`].
#[derive(Debug)]
pub struct DenseBlockMut<'a> {
    row_offset: usize,
    num_rows: usize,
    num_cols: usize,
    values: &'a mut [f64],
}

impl DenseBlockMut<'_> {
    /// First absolute row covered by this block.
    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn row_range(&self) -> Range<usize> {
        self.row_offset..self.row_offset + self.num_rows
    }
}

impl DenseTarget for DenseBlockMut<'_> {
    #[inline]
    fn set(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(
            self.row_range().contains(&row),
            "row {row} outside block {:?}",
            self.row_range()
        );
        self.values[(row - self.row_offset) * self.num_cols + col] = value;
    }
}

// ============================================================================
// Sparse Output
// ============================================================================

/// A sparse row with fixed-capacity parallel `values` / `indexes` arrays.
///
/// The arrays are only exposed as slices, so writers can fill slots but never
/// grow the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseRow {
    values: Vec<f64>,
    indexes: Vec<usize>,
}

impl SparseRow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: vec![0.0; capacity],
            indexes: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn indexes(&self) -> &[usize] {
        &self.indexes
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn indexes_mut(&mut self) -> &mut [usize] {
        &mut self.indexes
    }

    /// Value stored for output column `col`, or `0.0` if no slot holds it.
    /// Unwritten slots carry `(0.0, 0)` and are skipped.
    pub fn get(&self, col: usize) -> f64 {
        self.indexes
            .iter()
            .zip(&self.values)
            .filter(|&(&idx, _)| idx == col)
            .map(|(_, &v)| v)
            .find(|&v| v != 0.0)
            .unwrap_or(0.0)
    }
}

/// Sparse matrix made of [`SparseRow`]s.
///
/// The row storage starts out unmaterialized (`None`); once materialized,
/// individual rows may still be unallocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    num_rows: usize,
    num_cols: usize,
    rows: Option<Vec<Option<SparseRow>>>,
}

impl SparseMatrix {
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self {
            num_rows,
            num_cols,
            rows: None,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn is_materialized(&self) -> bool {
        self.rows.is_some()
    }

    /// Materialize the row storage without allocating any row.
    pub fn materialize(&mut self) {
        if self.rows.is_none() {
            self.rows = Some(vec![None; self.num_rows]);
        }
    }

    /// Materialize the storage and give every unallocated row `capacity` slots.
    pub fn allocate_rows(&mut self, capacity: usize) {
        self.materialize();
        if let Some(rows) = self.rows.as_mut() {
            for row in rows.iter_mut().filter(|r| r.is_none()) {
                *row = Some(SparseRow::with_capacity(capacity));
            }
        }
    }

    pub fn row(&self, row: usize) -> Option<&SparseRow> {
        self.rows.as_ref()?.get(row)?.as_ref()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.row(row).map_or(0.0, |r| r.get(col))
    }

    pub fn to_dense(&self) -> DenseMatrix {
        let mut out = DenseMatrix::new(self.num_rows, self.num_cols);
        for r in 0..self.num_rows {
            let Some(row) = self.row(r) else { continue };
            for (&idx, &v) in row.indexes().iter().zip(row.values()) {
                if v != 0.0 && idx < self.num_cols {
                    out.set(r, idx, v);
                }
            }
        }
        out
    }

    /// Split into disjoint blocks of `blk` rows (`0` = one block). An
    /// unmaterialized matrix yields blocks without storage.
    pub fn row_blocks_mut(&mut self, blk: usize) -> Vec<SparseBlockMut<'_>> {
        let rows_per_block = if blk == 0 { self.num_rows.max(1) } else { blk };
        let num_rows = self.num_rows;
        match self.rows.as_mut() {
            Some(rows) => rows
                .chunks_mut(rows_per_block)
                .enumerate()
                .map(|(i, chunk)| SparseBlockMut {
                    row_offset: i * rows_per_block,
                    num_rows: chunk.len(),
                    rows: Some(chunk),
                })
                .collect(),
            None => (0..num_rows)
                .step_by(rows_per_block)
                .map(|start| SparseBlockMut {
                    row_offset: start,
                    num_rows: rows_per_block.min(num_rows - start),
                    rows: None,
                })
                .collect(),
        }
    }
}

/// Mutable view over a contiguous range of rows of a [`SparseMatrix`].
#[derive(Debug)]
pub struct SparseBlockMut<'a> {
    row_offset: usize,
    num_rows: usize,
    rows: Option<&'a mut [Option<SparseRow>]>,
}

impl SparseBlockMut<'_> {
    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn row_range(&self) -> Range<usize> {
        self.row_offset..self.row_offset + self.num_rows
    }

    /// Whether the underlying matrix had its row storage materialized.
    pub fn is_materialized(&self) -> bool {
        self.rows.is_some()
    }

    /// Whether every row in `range` (absolute) lies in this block and is allocated.
    pub fn rows_allocated(&self, range: Range<usize>) -> bool {
        let Some(rows) = self.rows.as_deref() else {
            return false;
        };
        let block = self.row_range();
        range
            .into_iter()
            .all(|r| block.contains(&r) && rows[r - self.row_offset].is_some())
    }

    /// Allocated row at absolute index `row`.
    pub fn row_mut(&mut self, row: usize) -> Option<&mut SparseRow> {
        let idx = row.checked_sub(self.row_offset)?;
        self.rows.as_deref_mut()?.get_mut(idx)?.as_mut()
    }

    /// Shorter-lived view over the same rows, so several tasks can run against
    /// one block one after another.
    pub fn reborrow(&mut self) -> SparseBlockMut<'_> {
        SparseBlockMut {
            row_offset: self.row_offset,
            num_rows: self.num_rows,
            rows: self.rows.as_deref_mut(),
        }
    }
}

// ============================================================================
// Metadata Record
// ============================================================================

/// Row-major table of optional strings holding persisted encoder state.
///
/// One column per input column; encoders write into their own column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFrame {
    column_names: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl MetadataFrame {
    /// Empty record (zero rows) with columns `C1..Cn`.
    pub fn new(num_columns: usize) -> Self {
        Self::with_column_names((1..=num_columns).map(|i| format!("C{i}")).collect())
    }

    pub fn with_column_names(column_names: Vec<String>) -> Self {
        Self {
            column_names,
            rows: Vec::new(),
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Grow to at least `num_rows` rows of empty cells.
    pub fn ensure_allocated_rows(&mut self, num_rows: usize) {
        let num_columns = self.num_columns();
        if self.rows.len() < num_rows {
            self.rows.resize(num_rows, vec![None; num_columns]);
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col)?.as_deref()
    }

    /// # Panics
    /// If `(row, col)` is outside the allocated record.
    pub fn set(&mut self, row: usize, col: usize, value: impl Into<String>) {
        self.rows[row][col] = Some(value.into());
    }
}

// ============================================================================
// Tests
// ============================================================================
