//! Derived features and the undefined-value exclusion policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::data::model::{Dataset, EventRecord, Field, FieldType, FieldValue, Schema};
use crate::error::{PipelineError, Result};
use crate::expr::{ArithExpr, BoundArith};

/// Declaration of one derived field, e.g. `maxkpt = max(Kmpt, Kppt)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Derivation {
    Augmented(EventRecord),
    /// The record had an undefined value in `field` and must not be scored
    /// or counted.
    Excluded { field: String },
}

/// Exclusions from one `derive_dataset` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExclusionStats {
    pub total: usize,
    /// First offending field → records excluded because of it.
    pub by_field: BTreeMap<String, usize>,
}

struct BoundFeature {
    name: String,
    expr: BoundArith,
}

/// Computes derived fields for records of one input schema.
///
/// A record is excluded when any raw input of a derived field, any required
/// field, or any derived value is null or NaN.
pub struct FeatureDeriver {
    input: Arc<Schema>,
    output: Arc<Schema>,
    /// Columns checked before deriving: feature inputs then required fields.
    checked: Vec<(usize, String)>,
    features: Vec<BoundFeature>,
}

impl FeatureDeriver {
    pub fn new(input: Arc<Schema>, specs: &[FeatureSpec], required: &[String]) -> Result<Self> {
        let mut checked: Vec<(usize, String)> = Vec::new();
        let mut push_checked = |name: &str| -> Result<()> {
            let idx = input.index_of(name).ok_or_else(|| {
                PipelineError::SchemaMismatch(format!("required field '{name}' not in schema"))
            })?;
            if !checked.iter().any(|(i, _)| *i == idx) {
                checked.push((idx, name.to_string()));
            }
            Ok(())
        };

        let mut features = Vec::with_capacity(specs.len());
        for spec in specs {
            let expr = ArithExpr::parse(&spec.expr)?;
            for field in expr.fields() {
                push_checked(field)?;
            }
            features.push(BoundFeature {
                name: spec.name.clone(),
                expr: expr.bind(&input)?,
            });
        }
        for name in required {
            push_checked(name)?;
        }

        let extra: Vec<Field> = features
            .iter()
            .map(|f| Field::new(f.name.clone(), FieldType::Float64))
            .collect();
        let output = Arc::new(input.extended(&extra)?);

        Ok(FeatureDeriver {
            input,
            output,
            checked,
            features,
        })
    }

    /// Schema of augmented records: input fields, then derived fields.
    pub fn output_schema(&self) -> &Arc<Schema> {
        &self.output
    }

    pub fn derive(&self, record: &EventRecord) -> Derivation {
        for (idx, name) in &self.checked {
            if record.get(*idx).map_or(true, |v| v.is_undefined()) {
                return Derivation::Excluded { field: name.clone() };
            }
        }
        let mut derived = Vec::with_capacity(self.features.len());
        for feature in &self.features {
            let value = feature.expr.eval(record);
            if value.is_nan() {
                return Derivation::Excluded {
                    field: feature.name.clone(),
                };
            }
            derived.push(FieldValue::Float(value));
        }
        Derivation::Augmented(record.extended(derived))
    }

    /// Augment every record, dropping excluded ones and adding them to the
    /// dataset's exclusion tally.
    pub fn derive_dataset(&self, dataset: &Dataset) -> Result<(Dataset, ExclusionStats)> {
        if dataset.schema() != &self.input {
            return Err(PipelineError::SchemaMismatch(format!(
                "{} dataset schema differs from the one the features were declared on",
                dataset.role
            )));
        }

        let mut stats = ExclusionStats::default();
        let mut records = Vec::with_capacity(dataset.len());
        for record in dataset.records() {
            match self.derive(record) {
                Derivation::Augmented(r) => records.push(r),
                Derivation::Excluded { field } => {
                    stats.total += 1;
                    *stats.by_field.entry(field).or_default() += 1;
                }
            }
        }

        info!(
            "{}: {} records derived, {} excluded for undefined values",
            dataset.role,
            records.len(),
            stats.total
        );
        for (field, n) in &stats.by_field {
            debug!("{}: {n} excluded on '{field}'", dataset.role);
        }
        Ok((
            dataset.derived(Arc::clone(&self.output), records, stats.total),
            stats,
        ))
    }
}
