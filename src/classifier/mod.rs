//! Pretrained classifiers behind one scoring interface.
//!
//! Models are read from JSON weight files; training happens elsewhere. Which
//! methods run is an explicit `{method: enabled}` table rather than a global
//! switch map.

pub mod fisher;
pub mod forest;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::data::model::{Dataset, Field, FieldType, FieldValue, Schema};
use crate::error::{PipelineError, Result};

pub use fisher::FisherDiscriminant;
pub use forest::{BoostedForest, Boosting, Node, Tree};

/// A pure function from an ordered feature vector to a score.
pub trait Scorer: Send + Sync {
    /// Method name; also the name of the score field it produces.
    fn name(&self) -> &str;

    /// Input field names, in the order `score` expects them.
    fn inputs(&self) -> &[String];

    /// # Panics
    ///
    /// If `features.len()` differs from `inputs().len()`.
    fn score(&self, features: &[f64]) -> f64;
}

/// On-disk model file, discriminated by `"kind"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelFile {
    Forest(BoostedForest),
    Fisher(FisherDiscriminant),
}

impl ModelFile {
    fn into_scorer(self) -> std::result::Result<Box<dyn Scorer>, String> {
        match self {
            ModelFile::Forest(f) => {
                f.validate()?;
                Ok(Box::new(f))
            }
            ModelFile::Fisher(f) => {
                f.validate()?;
                Ok(Box::new(f))
            }
        }
    }
}

/// Load one model file. Any failure is a `ModelLoad` error.
pub fn load_model(path: &Path) -> Result<Box<dyn Scorer>> {
    let fail = |reason: String| PipelineError::ModelLoad {
        path: path.to_path_buf(),
        reason,
    };
    let text = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let file: ModelFile = serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;
    file.into_scorer().map_err(fail)
}

/// Weight-file location for `method`: `{dir}/{prefix}_{method}.weights.json`.
pub fn weights_path(dir: &Path, prefix: &str, method: &str) -> PathBuf {
    dir.join(format!("{prefix}_{method}.weights.json"))
}

/// The enabled scorers. Score fields are appended in the order the scorers
/// were given; [`ScorerSet::load`] gives them in method-name order.
#[derive(Default)]
pub struct ScorerSet {
    scorers: Vec<Box<dyn Scorer>>,
}

impl ScorerSet {
    pub fn new(scorers: Vec<Box<dyn Scorer>>) -> Self {
        ScorerSet { scorers }
    }

    /// Load every enabled method, sorted by name. Disabled entries are skipped.
    pub fn load(dir: &Path, prefix: &str, methods: &BTreeMap<String, bool>) -> Result<Self> {
        let mut scorers = Vec::new();
        for (method, _) in methods.iter().filter(|(_, enabled)| **enabled) {
            let path = weights_path(dir, prefix, method);
            let scorer = load_model(&path)?;
            if scorer.name() != method {
                return Err(PipelineError::ModelLoad {
                    path,
                    reason: format!("file declares method '{}', expected '{method}'", scorer.name()),
                });
            }
            info!("booked {method} ({} inputs) from {}", scorer.inputs().len(), path.display());
            scorers.push(scorer);
        }
        Ok(ScorerSet { scorers })
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scorers.iter().map(|s| s.name()).collect()
    }

    /// Union of all model inputs, first-seen order.
    pub fn inputs(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for name in self.scorers.iter().flat_map(|s| s.inputs()) {
            if !out.contains(&name.as_str()) {
                out.push(name);
            }
        }
        out
    }

    /// Schema of records scored from `schema`: one `Float64` field per method
    /// appended. Fails if a model input is missing.
    pub fn output_schema(&self, schema: &Schema) -> Result<Schema> {
        for scorer in &self.scorers {
            input_columns(schema, scorer.as_ref())?;
        }
        let extra: Vec<Field> = self
            .scorers
            .iter()
            .map(|s| Field::new(s.name(), FieldType::Float64))
            .collect();
        schema.extended(&extra)
    }

    /// Append one `Float64` score field per method to every record.
    pub fn score_dataset(&self, dataset: &Dataset) -> Result<Dataset> {
        if self.scorers.is_empty() {
            return Ok(dataset.clone());
        }
        let schema = dataset.schema();
        let columns = self
            .scorers
            .iter()
            .map(|s| input_columns(schema, s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let output = Arc::new(self.output_schema(schema)?);

        let mut features = Vec::new();
        let records = dataset
            .records()
            .iter()
            .map(|record| {
                let scores = self.scorers.iter().zip(&columns).map(|(scorer, cols)| {
                    features.clear();
                    features.extend(
                        cols.iter()
                            .map(|&c| record.get(c).map_or(f64::NAN, |v| v.as_f64())),
                    );
                    FieldValue::Float(scorer.score(&features))
                });
                record.extended(scores.collect::<Vec<_>>())
            })
            .collect();

        info!("{}: scored {} records with {}", dataset.role, dataset.len(), self.names().join(", "));
        Ok(dataset.derived(output, records, 0))
    }
}

/// Column index of every model input, in model order.
fn input_columns(schema: &Schema, scorer: &dyn Scorer) -> Result<Vec<usize>> {
    scorer
        .inputs()
        .iter()
        .map(|name| {
            schema.index_of(name).ok_or_else(|| {
                PipelineError::SchemaMismatch(format!(
                    "{} input '{name}' not in dataset",
                    scorer.name()
                ))
            })
        })
        .collect()
}
