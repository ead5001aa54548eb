use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// FieldType / Schema – the one declared layout shared by reader and writer
// ---------------------------------------------------------------------------

/// Storage type of a column. Integers and floats keep their width on the
/// way back out so an exported table matches the table it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Int32,
    Int64,
    Float32,
    Float64,
}

impl FieldType {
    pub fn is_integer(self) -> bool {
        matches!(self, FieldType::Int32 | FieldType::Int64)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float32 => "float32",
            FieldType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Field {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered `(name, type)` list with a name → column index lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema, rejecting duplicate field names.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.name.clone(), i).is_some() {
                return Err(PipelineError::SchemaMismatch(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
        }
        Ok(Schema { fields, index })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// A new schema with `extra` appended after the existing fields.
    pub fn extended(&self, extra: &[Field]) -> Result<Self> {
        let mut fields = self.fields.clone();
        fields.extend_from_slice(extra);
        Schema::new(fields)
    }
}

// ---------------------------------------------------------------------------
// FieldValue – a single cell
// ---------------------------------------------------------------------------

/// A numeric cell. `Null` is an undefined value (parquet null, empty CSV cell).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Null,
}

impl FieldValue {
    /// Numeric view used by predicates and features. `Null` reads as NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Int(i) => *i as f64,
            FieldValue::Float(v) => *v,
            FieldValue::Null => f64::NAN,
        }
    }

    /// `Null` or NaN.
    pub fn is_undefined(&self) -> bool {
        match self {
            FieldValue::Int(_) => false,
            FieldValue::Float(v) => v.is_nan(),
            FieldValue::Null => true,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Null => write!(f, "<null>"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventRecord – one row
// ---------------------------------------------------------------------------

/// One row, aligned column-for-column with its dataset's [`Schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    values: Vec<FieldValue>,
}

impl EventRecord {
    pub fn new(values: Vec<FieldValue>) -> Self {
        EventRecord { values }
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<FieldValue> {
        self.values.get(index).copied()
    }

    /// Look a value up by field name.
    pub fn get_by_name(&self, schema: &Schema, name: &str) -> Option<FieldValue> {
        schema.index_of(name).and_then(|i| self.get(i))
    }

    /// A new record with `extra` appended; `self` is left untouched.
    pub fn extended(&self, extra: impl IntoIterator<Item = FieldValue>) -> Self {
        let mut values = self.values.clone();
        values.extend(extra);
        EventRecord { values }
    }
}

// ---------------------------------------------------------------------------
// Dataset – a labelled, weighted table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Signal,
    Background,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Signal => f.write_str("signal"),
            Role::Background => f.write_str("background"),
        }
    }
}

/// Ordered records sharing one schema, tagged with a role and a weight that
/// scales every count taken from it.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub role: Role,
    pub weight: f64,
    schema: Arc<Schema>,
    records: Vec<EventRecord>,
    /// Records dropped upstream because of undefined feature values.
    excluded: usize,
}

impl Dataset {
    /// Build a dataset, checking every record against the schema width.
    pub fn new(
        role: Role,
        weight: f64,
        schema: Arc<Schema>,
        records: Vec<EventRecord>,
    ) -> Result<Self> {
        if let Some((row, rec)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.values.len() != schema.len())
        {
            return Err(PipelineError::SchemaMismatch(format!(
                "record {row} has {} values, schema has {} fields",
                rec.values.len(),
                schema.len()
            )));
        }
        Ok(Dataset {
            role,
            weight,
            schema,
            records,
            excluded: 0,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn excluded(&self) -> usize {
        self.excluded
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Same role, weight, and exclusion tally over a different set of
    /// records and schema.
    pub(crate) fn derived(
        &self,
        schema: Arc<Schema>,
        records: Vec<EventRecord>,
        newly_excluded: usize,
    ) -> Self {
        Dataset {
            role: self.role,
            weight: self.weight,
            schema,
            records,
            excluded: self.excluded + newly_excluded,
        }
    }

    /// The records at `indices`, in that order, under the same schema.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let records = indices
            .iter()
            .filter_map(|&i| self.records.get(i).cloned())
            .collect();
        self.derived(Arc::clone(&self.schema), records, 0)
    }
}
