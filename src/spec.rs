//! Transform spec parsing.
//!
//! A transform spec is a JSON object naming the columns to hash and the
//! number of buckets:
//!
//! ```json
//! { "ids": true, "hash": [1, 3], "K": 100 }
//! { "hash": ["city", "browser"], "K": 4096 }
//! ```
//!
//! With `"ids": true` the `hash` list holds 1-based column ids; otherwise it
//! holds column names resolved against the input frame.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::ColumnId;
use crate::encoder::{ColumnEncoder, EncoderError, Result};
use crate::feature_hash::FeatureHashEncoder;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Id(i32),
    Name(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformSpec {
    #[serde(default)]
    pub ids: bool,
    #[serde(default)]
    pub hash: Vec<ColumnRef>,
    #[serde(rename = "K", default)]
    pub k: Option<i64>,
}

impl TransformSpec {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Resolve the `hash` list to sorted, de-duplicated column ids.
    pub fn hash_columns(&self, column_names: &[String]) -> Result<Vec<ColumnId>> {
        let mut ids = Vec::with_capacity(self.hash.len());
        for col in &self.hash {
            let id = match (self.ids, col) {
                (true, ColumnRef::Id(id)) => {
                    if *id < 1 || *id as usize > column_names.len() {
                        return Err(EncoderError::InvalidSpec(format!(
                            "column id {id} out of range [1, {}]",
                            column_names.len()
                        )));
                    }
                    ColumnId(*id)
                }
                (false, ColumnRef::Name(name)) => {
                    let pos = column_names.iter().position(|n| n == name).ok_or_else(|| {
                        EncoderError::InvalidSpec(format!("unknown column '{name}'"))
                    })?;
                    ColumnId(pos as i32 + 1)
                }
                (true, ColumnRef::Name(name)) => {
                    return Err(EncoderError::InvalidSpec(format!(
                        "expected column ids, got name '{name}'"
                    )));
                }
                (false, ColumnRef::Id(id)) => {
                    return Err(EncoderError::InvalidSpec(format!(
                        "expected column names, got id {id} (set \"ids\": true)"
                    )));
                }
            };
            ids.push(id);
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// One feature-hash encoder per hashed column.
    ///
    /// Without `K` the encoders start with an unset modulus, to be filled from
    /// a metadata record before apply.
    pub fn build_encoders(&self, column_names: &[String]) -> Result<Vec<ColumnEncoder>> {
        let columns = self.hash_columns(column_names)?;
        let k = match self.k {
            Some(k) if k > 0 => k,
            Some(k) => return Err(EncoderError::InvalidSpec(format!("K must be positive, got {k}"))),
            None => 0,
        };
        Ok(columns
            .into_iter()
            .map(|id| FeatureHashEncoder::new(id, k).into())
            .collect())
    }
}
