//! Saved model parameters.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::ModelDims;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    /// Row-major.
    pub data: Vec<f32>,
}

/// Every parameter tensor of a model, plus the dimensions needed to check
/// that a checkpoint fits the model it's loaded into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub dims: ModelDims,
    pub tensors: Vec<NamedTensor>,
}

impl Checkpoint {
    pub fn get(&self, name: &str) -> Option<&NamedTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let f = BufWriter::new(
            File::create(path).with_context(|| format!("failed to create checkpoint {path:?}"))?,
        );
        bincode::serialize_into(f, self).with_context(|| format!("failed to write checkpoint {path:?}"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let f = BufReader::new(
            File::open(path).with_context(|| format!("failed to open checkpoint {path:?}"))?,
        );
        bincode::deserialize_from(f).with_context(|| format!("failed to load checkpoint from {path:?}"))
    }
}
