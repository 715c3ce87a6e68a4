//! Multi-column transform driver.
//!
//! Splits the output into disjoint row chunks and runs every encoder over
//! each chunk on the rayon pool. Workers never share a row, so the output is
//! written without locks. The first error aborts the transform.

use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::{ColumnId, DenseMatrix, Frame, MetadataFrame, SparseMatrix};
use crate::encoder::{ColumnEncoder, EncoderError, Result, TransformInput};
use crate::spec::TransformSpec;
use crate::stats;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Rows per chunk. `0` processes all rows as a single chunk.
    pub block_size: usize,
    /// Write into pre-allocated sparse rows instead of a dense matrix.
    pub sparse: bool,
    /// Enable the process-wide timing counters.
    pub statistics: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            sparse: false,
            statistics: false,
        }
    }
}

// ============================================================================
// Multi-Column Encoder
// ============================================================================

/// The encoders of one transform. Output column `j` belongs to the `j`-th
/// encoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiColumnEncoder {
    encoders: Vec<ColumnEncoder>,
}

impl MultiColumnEncoder {
    pub fn new(encoders: Vec<ColumnEncoder>) -> Self {
        Self { encoders }
    }

    pub fn from_spec(spec: &TransformSpec, column_names: &[String]) -> Result<Self> {
        Ok(Self::new(spec.build_encoders(column_names)?))
    }

    pub fn encoders(&self) -> &[ColumnEncoder] {
        &self.encoders
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    pub fn find(&self, column_id: ColumnId) -> Option<&ColumnEncoder> {
        self.encoders.iter().find(|e| e.column_id() == column_id)
    }

    fn find_mut(&mut self, column_id: ColumnId) -> Option<&mut ColumnEncoder> {
        self.encoders.iter_mut().find(|e| e.column_id() == column_id)
    }

    /// Run every encoder's build phase, then its build tasks.
    pub fn build(&mut self, input: &Frame) -> Result<()> {
        for e in &mut self.encoders {
            e.build(input);
        }
        let mut tasks: Vec<_> = self.encoders.iter().flat_map(|e| e.build_tasks(input)).collect();
        debug!(num_tasks = tasks.len(), "running build tasks");
        tasks.par_iter_mut().try_for_each(|t| t.call().map(|_| ()))
    }

    /// Export every encoder into a fresh one-row record shaped like `input`.
    pub fn metadata(&self, input: &Frame) -> Result<MetadataFrame> {
        let mut meta = MetadataFrame::with_column_names(input.column_names());
        meta.ensure_allocated_rows(1);
        self.export_metadata(&mut meta)?;
        Ok(meta)
    }

    pub fn export_metadata(&self, meta: &mut MetadataFrame) -> Result<()> {
        self.encoders.iter().try_for_each(|e| e.export_metadata(meta))
    }

    pub fn init_metadata(&mut self, meta: &MetadataFrame) -> Result<()> {
        self.encoders
            .iter_mut()
            .try_for_each(|e| e.import_metadata(Some(meta)))
    }

    /// Merge a partition-local transform into this one. Existing encoders keep
    /// their output columns; encoders of columns this transform does not know
    /// yet are appended in `other`'s order.
    pub fn merge(&mut self, other: &MultiColumnEncoder) {
        for o in &other.encoders {
            match self.find_mut(o.column_id()) {
                Some(e) => e.merge_at(o),
                None => self.encoders.push(o.clone()),
            }
        }
    }

    fn check_output(&self, input_rows: usize, rows: usize, cols: usize) -> Result<()> {
        if rows < input_rows || cols < self.encoders.len() {
            return Err(EncoderError::OutputShape {
                rows,
                cols,
                expected_rows: input_rows,
                expected_cols: self.encoders.len(),
            });
        }
        Ok(())
    }

    /// Encode `input` into `out`, one chunk of `config.block_size` rows per task.
    pub fn apply_dense(
        &self,
        input: TransformInput<'_>,
        out: &mut DenseMatrix,
        config: &TransformConfig,
    ) -> Result<()> {
        self.check_output(input.num_rows(), out.num_rows(), out.num_cols())?;
        stats::set_enabled(config.statistics);
        let t0 = Instant::now();
        let mut blocks = out.row_blocks_mut(config.block_size);
        let num_blocks = blocks.len();
        blocks.par_iter_mut().try_for_each(|block| {
            let (start, n) = (block.row_offset(), block.num_rows());
            for (j, e) in self.encoders.iter().enumerate() {
                e.apply(input, block, j, start, n)?;
            }
            Ok::<_, EncoderError>(())
        })?;
        info!(
            "Dense transform: {} rows x {} encoders in {} chunks ({:.2?})",
            input.num_rows(),
            self.encoders.len(),
            num_blocks,
            t0.elapsed()
        );
        Ok(())
    }

    /// Encode `input` into sparse rows. Rows are allocated with one slot per
    /// input column before any task runs.
    pub fn apply_sparse(
        &self,
        input: &Frame,
        out: &mut SparseMatrix,
        config: &TransformConfig,
    ) -> Result<()> {
        self.check_output(input.num_rows(), out.num_rows(), out.num_cols())?;
        stats::set_enabled(config.statistics);
        out.allocate_rows(input.num_columns());

        let t0 = Instant::now();
        let mut blocks = out.row_blocks_mut(config.block_size);
        let written: usize = blocks
            .par_iter_mut()
            .map(|block| {
                let (start, n) = (block.row_offset(), block.num_rows());
                let mut written = 0;
                for (j, e) in self.encoders.iter().enumerate() {
                    let mut task =
                        e.sparse_task(TransformInput::Frame(input), block.reborrow(), j, start, n)?;
                    written += task.call()?;
                }
                Ok::<_, EncoderError>(written)
            })
            .sum::<Result<usize>>()?;
        info!(
            "Sparse transform: {} cells over {} rows x {} encoders ({:.2?})",
            written,
            input.num_rows(),
            self.encoders.len(),
            t0.elapsed()
        );
        Ok(())
    }

    /// Build, allocate a dense output, and apply. Returns the encoded matrix
    /// and the metadata record for a later standalone apply.
    pub fn encode(
        &mut self,
        input: &Frame,
        config: &TransformConfig,
    ) -> Result<(DenseMatrix, MetadataFrame)> {
        self.build(input)?;
        let mut out = DenseMatrix::new(input.num_rows(), self.encoders.len());
        self.apply_dense(TransformInput::Frame(input), &mut out, config)?;
        Ok((out, self.metadata(input)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FloatKey, FrameColumn, Value, ValueType};
    use crate::feature_hash::{FeatureHashEncoder, code};

    fn sessions(n: usize) -> Frame {
        // Short ASCII keys hash to non-negative values, so no NaN codes.
        let cities = ["rome", "lagos", "lima", "osaka", "perth"];
        let browsers = ["edge", "opera", "arc"];
        Frame::new()
            .with_column(FrameColumn::new(
                "id",
                ValueType::Int64,
                (0..n).map(|i| Some(Value::Int(i as i64))).collect(),
            ))
            .with_column(FrameColumn::strings(
                "city",
                (0..n).map(|i| Some(cities[i % cities.len()])),
            ))
            .with_column(FrameColumn::strings(
                "browser",
                (0..n).map(|i| Some(browsers[i % browsers.len()])),
            ))
    }

    fn hash_city_browser(k: i64) -> MultiColumnEncoder {
        let spec = TransformSpec {
            ids: true,
            hash: vec![crate::spec::ColumnRef::Id(2), crate::spec::ColumnRef::Id(3)],
            k: Some(k),
        };
        MultiColumnEncoder::from_spec(&spec, &sessions(0).column_names()).unwrap()
    }

    #[test]
    fn test_encode_dense_matches_serial_codes() {
        let _guard = stats::test_guard();
        let frame = sessions(1000);
        let mut enc = hash_city_browser(50);
        let config = TransformConfig {
            block_size: 37,
            ..Default::default()
        };
        let (out, meta) = enc.encode(&frame, &config).unwrap();

        assert_eq!(out.num_cols(), 2);
        for r in 0..frame.num_rows() {
            let city = frame.get(r, 1).unwrap().to_string();
            let browser = frame.get(r, 2).unwrap().to_string();
            assert_eq!(out.get(r, 0), code(&city, 50) as f64);
            assert_eq!(out.get(r, 1), code(&browser, 50) as f64);
        }

        assert_eq!(meta.num_rows(), 1);
        assert_eq!(meta.get(0, 0), None);
        assert_eq!(meta.get(0, 1), Some("50"));
        assert_eq!(meta.get(0, 2), Some("50"));
    }

    #[test]
    fn test_block_size_does_not_change_output() {
        let _guard = stats::test_guard();
        let frame = sessions(333);
        let enc = hash_city_browser(7);
        let mut outputs = Vec::new();
        for block_size in [0, 1, 10, 333, 1000] {
            let mut out = DenseMatrix::new(333, 2);
            let config = TransformConfig {
                block_size,
                ..Default::default()
            };
            enc.apply_dense(TransformInput::Frame(&frame), &mut out, &config)
                .unwrap();
            outputs.push(out);
        }
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_standalone_apply_from_metadata() {
        let _guard = stats::test_guard();
        let frame = sessions(20);
        let mut built = hash_city_browser(13);
        let (expected, meta) = built.encode(&frame, &TransformConfig::default()).unwrap();

        let mut standalone = MultiColumnEncoder::new(vec![
            FeatureHashEncoder::new(ColumnId(2), 0).into(),
            FeatureHashEncoder::new(ColumnId(3), 0).into(),
        ]);
        standalone.init_metadata(&meta).unwrap();
        let mut out = DenseMatrix::new(20, 2);
        standalone
            .apply_dense(TransformInput::Frame(&frame), &mut out, &TransformConfig::default())
            .unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_missing_value_aborts_transform() {
        let _guard = stats::test_guard();
        let frame = Frame::new().with_column(FrameColumn::strings(
            "city",
            (0..100).map(|i| if i == 77 { None } else { Some("lima") }),
        ));
        let enc = MultiColumnEncoder::new(vec![FeatureHashEncoder::new(ColumnId(1), 5).into()]);
        let mut out = DenseMatrix::new(100, 1);
        let config = TransformConfig {
            block_size: 8,
            ..Default::default()
        };
        let err = enc
            .apply_dense(TransformInput::Frame(&frame), &mut out, &config)
            .unwrap_err();
        assert!(matches!(err, EncoderError::MissingValue { row: 77, .. }));
    }

    #[test]
    fn test_output_shape_checked() {
        let frame = sessions(10);
        let enc = hash_city_browser(5);
        let mut out = DenseMatrix::new(10, 1);
        let err = enc
            .apply_dense(TransformInput::Frame(&frame), &mut out, &TransformConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            EncoderError::OutputShape {
                expected_cols: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_matrix_input() {
        let _guard = stats::test_guard();
        let input = DenseMatrix::from_rows((0..50).map(|i| vec![(i % 4) as f64]).collect());
        let enc = MultiColumnEncoder::new(vec![FeatureHashEncoder::new(ColumnId(1), 9).into()]);
        let mut out = DenseMatrix::new(50, 1);
        let config = TransformConfig {
            block_size: 6,
            ..Default::default()
        };
        enc.apply_dense(TransformInput::Matrix(&input), &mut out, &config)
            .unwrap();
        for r in 0..50 {
            assert_eq!(out.get(r, 0), code(&FloatKey((r % 4) as f64).to_string(), 9) as f64);
        }
    }

    #[test]
    fn test_sparse_matches_dense() {
        let _guard = stats::test_guard();
        let frame = sessions(250);
        let enc = hash_city_browser(31);
        let config = TransformConfig {
            block_size: 16,
            sparse: true,
            ..Default::default()
        };

        let mut sparse = SparseMatrix::new(250, 2);
        enc.apply_sparse(&frame, &mut sparse, &config).unwrap();
        let mut dense = DenseMatrix::new(250, 2);
        enc.apply_dense(TransformInput::Frame(&frame), &mut dense, &config)
            .unwrap();

        assert_eq!(sparse.to_dense(), dense);
        let row = sparse.row(0).unwrap();
        assert_eq!(row.capacity(), 3);
        assert_eq!(&row.indexes()[1..], &[0, 1]);
    }

    #[test]
    fn test_merge_partitions() {
        let mut a = MultiColumnEncoder::new(vec![
            FeatureHashEncoder::new(ColumnId(3), 0).into(),
            FeatureHashEncoder::new(ColumnId(1), 7).into(),
        ]);
        let b = MultiColumnEncoder::new(vec![
            FeatureHashEncoder::new(ColumnId(1), 5).into(),
            FeatureHashEncoder::new(ColumnId(2), 4).into(),
            FeatureHashEncoder::new(ColumnId(3), 9).into(),
        ]);
        a.merge(&b);
        let moduli: Vec<_> = a
            .encoders()
            .iter()
            .map(|e| match e {
                ColumnEncoder::FeatureHash(f) => (f.column_id().0, f.modulus()),
            })
            .collect();
        assert_eq!(moduli, vec![(3, 9), (1, 7), (2, 4)]);
    }

    #[test]
    fn test_merge_keeps_output_columns() {
        let frame = sessions(12);
        let mut enc = MultiColumnEncoder::new(vec![
            FeatureHashEncoder::new(ColumnId(3), 11).into(),
            FeatureHashEncoder::new(ColumnId(2), 0).into(),
        ]);
        enc.merge(&MultiColumnEncoder::new(vec![
            FeatureHashEncoder::new(ColumnId(2), 5).into(),
            FeatureHashEncoder::new(ColumnId(1), 4).into(),
        ]));
        let ids: Vec<_> = enc.encoders().iter().map(|e| e.column_id().0).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let _guard = stats::test_guard();
        let mut out = DenseMatrix::new(12, 3);
        enc.apply_dense(TransformInput::Frame(&frame), &mut out, &TransformConfig::default())
            .unwrap();
        for r in 0..12 {
            let browser = frame.get(r, 2).unwrap().to_string();
            let city = frame.get(r, 1).unwrap().to_string();
            assert_eq!(out.get(r, 0), code(&browser, 11) as f64);
            assert_eq!(out.get(r, 1), code(&city, 5) as f64);
            assert_eq!(out.get(r, 2), code(&r.to_string(), 4) as f64);
        }
    }

    #[test]
    fn test_statistics_flag_follows_config() {
        let _guard = stats::test_guard();
        let frame = sessions(10);
        let enc = hash_city_browser(7);
        let mut out = DenseMatrix::new(10, 2);

        let on = TransformConfig {
            statistics: true,
            ..Default::default()
        };
        enc.apply_dense(TransformInput::Frame(&frame), &mut out, &on).unwrap();
        assert!(stats::is_enabled());

        enc.apply_dense(TransformInput::Frame(&frame), &mut out, &TransformConfig::default())
            .unwrap();
        assert!(!stats::is_enabled());

        let mut sparse = SparseMatrix::new(10, 2);
        enc.apply_sparse(&frame, &mut sparse, &on).unwrap();
        assert!(stats::is_enabled());
        stats::set_enabled(false);
    }
}
