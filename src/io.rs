//! Reading frames from parquet and writing encoded outputs.
//!
//! ## `matrix.bin` layout
//!
//! ```text
//! Header (16 bytes):
//!   [0] num_rows (u64)
//!   [1] num_cols (u64)
//! Data:
//!   row-major f64 values [num_rows * num_cols elements]
//! ```
//!
//! All values are native-endian.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use arrow::array::*;
use arrow::compute::concat_batches;
use arrow::datatypes::DataType;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{info, warn};

use crate::common::{DenseMatrix, DenseTarget, Frame, FrameColumn, MetadataFrame, Value, ValueType};
use crate::encoder::Result;

// ============================================================================
// Parquet -> Frame
// ============================================================================

/// Load a whole parquet file into a [`Frame`].
pub fn read_parquet_frame(path: &Path) -> Result<Frame> {
    info!("Loading {}", path.display());
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(1_000_000)
        .build()?;

    let schema = reader.schema().clone();
    let batches: Vec<RecordBatch> = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;
    Ok(frame_from_record_batch(&batch))
}

/// Convert every column of `batch`, keeping arrow nulls as missing cells.
pub fn frame_from_record_batch(batch: &RecordBatch) -> Frame {
    let schema = batch.schema();
    let mut frame = Frame::new();
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        let (vtype, values) = array_to_values(array.as_ref());
        frame.push_column(FrameColumn::new(field.name().clone(), vtype, values));
    }
    frame
}

fn array_to_values(array: &dyn Array) -> (ValueType, Vec<Option<Value>>) {
    let n = array.len();
    match array.data_type() {
        DataType::Boolean => {
            let ba = array.as_boolean();
            let values = collect(n, |i| (!ba.is_null(i)).then(|| Value::Bool(ba.value(i))));
            (ValueType::Boolean, values)
        }
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => match cast_to_i64(array) {
            Some(ia) => {
                let values = collect(n, |i| (!ia.is_null(i)).then(|| Value::Int(ia.value(i))));
                (ValueType::Int64, values)
            }
            None => strings(array),
        },
        DataType::Float16 | DataType::Float32 | DataType::Float64 => match cast_to_f64(array) {
            Some(fa) => {
                let values = collect(n, |i| (!fa.is_null(i)).then(|| Value::Float(fa.value(i))));
                (ValueType::Float64, values)
            }
            None => strings(array),
        },
        _ => strings(array),
    }
}

fn collect(n: usize, f: impl Fn(usize) -> Option<Value>) -> Vec<Option<Value>> {
    (0..n).map(f).collect()
}

/// Everything else (Utf8, LargeUtf8, dictionaries, dates, UInt64, ...) is cast
/// to Utf8. Columns arrow cannot cast are read as all-missing.
fn strings(array: &dyn Array) -> (ValueType, Vec<Option<Value>>) {
    let n = array.len();
    let Ok(cast) = arrow::compute::cast(array, &DataType::Utf8) else {
        warn!("Cannot cast {} to Utf8, treating column as missing", array.data_type());
        return (ValueType::String, vec![None; n]);
    };
    let sa = cast.as_string::<i32>();
    let values = collect(n, |i| (!sa.is_null(i)).then(|| Value::Str(sa.value(i).to_string())));
    (ValueType::String, values)
}

fn cast_to_i64(array: &dyn Array) -> Option<Int64Array> {
    arrow::compute::cast(array, &DataType::Int64)
        .ok()
        .and_then(|a| a.as_any().downcast_ref::<Int64Array>().cloned())
}

fn cast_to_f64(array: &dyn Array) -> Option<Float64Array> {
    arrow::compute::cast(array, &DataType::Float64)
        .ok()
        .and_then(|a| a.as_any().downcast_ref::<Float64Array>().cloned())
}

// ============================================================================
// Dense Matrix Binary
// ============================================================================

pub fn write_dense_bin(matrix: &DenseMatrix, path: &Path) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(&(matrix.num_rows() as u64).to_ne_bytes())?;
    w.write_all(&(matrix.num_cols() as u64).to_ne_bytes())?;
    for v in matrix.values() {
        w.write_all(&v.to_ne_bytes())?;
    }
    w.flush()
}

pub fn read_dense_bin(path: &Path) -> std::io::Result<DenseMatrix> {
    let mut r = BufReader::new(File::open(path)?);
    let mut word = [0u8; 8];
    r.read_exact(&mut word)?;
    let num_rows = u64::from_ne_bytes(word) as usize;
    r.read_exact(&mut word)?;
    let num_cols = u64::from_ne_bytes(word) as usize;

    let mut matrix = DenseMatrix::new(num_rows, num_cols);
    for row in 0..num_rows {
        for col in 0..num_cols {
            r.read_exact(&mut word)?;
            matrix.set(row, col, f64::from_ne_bytes(word));
        }
    }
    Ok(matrix)
}

// ============================================================================
// Metadata JSON
// ============================================================================

pub fn write_metadata_json(meta: &MetadataFrame, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_metadata_json(path: &Path) -> Result<MetadataFrame> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
