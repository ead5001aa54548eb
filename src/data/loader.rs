use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt8Type,
};
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::model::{Dataset, EventRecord, Field, FieldType, FieldValue, Role, Schema};
use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Parquet,
    Csv,
}

impl TableFormat {
    /// Dispatch by extension.
    ///
    /// Supported formats:
    /// * `.parquet` / `.pq` – flat numeric columns (recommended)
    /// * `.csv`             – header row, numeric cells, empty cell = null
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "parquet" | "pq" => Ok(TableFormat::Parquet),
            "csv" => Ok(TableFormat::Csv),
            other => Err(PipelineError::SchemaMismatch(format!(
                "unsupported file extension: .{other}"
            ))),
        }
    }
}

/// An opened table whose schema has been read.
#[derive(Debug, Clone)]
pub struct TableSource {
    pub path: PathBuf,
    pub format: TableFormat,
    schema: Arc<Schema>,
}

impl TableSource {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

/// Open a table and read its schema. Fails with `DatasetNotFound` when the
/// path does not exist and `SchemaMismatch` when no usable schema is present.
pub fn open(path: &Path) -> Result<TableSource> {
    if !path.exists() {
        return Err(PipelineError::DatasetNotFound {
            path: path.to_path_buf(),
        });
    }
    let format = TableFormat::from_path(path)?;
    let schema = match format {
        TableFormat::Parquet => parquet_schema(path)?,
        TableFormat::Csv => csv_schema(path)?,
    };
    debug!("opened {} with {} fields", path.display(), schema.len());
    Ok(TableSource {
        path: path.to_path_buf(),
        format,
        schema: Arc::new(schema),
    })
}

/// Read every record of an opened table into memory.
pub fn read_all(source: &TableSource, role: Role, weight: f64) -> Result<Dataset> {
    let records = match source.format {
        TableFormat::Parquet => read_parquet(source)?,
        TableFormat::Csv => read_csv(source)?,
    };
    info!(
        "loaded {} {role} records from {}",
        records.len(),
        source.path.display()
    );
    Dataset::new(role, weight, Arc::clone(&source.schema), records)
}

/// `open` + `read_all`.
pub fn load_dataset(path: &Path, role: Role, weight: f64) -> Result<Dataset> {
    read_all(&open(path)?, role, weight)
}

/// Fail with `SchemaMismatch` if any of `names` is absent from the dataset.
pub fn require_fields<'a>(
    dataset: &Dataset,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let missing: Vec<&str> = names
        .into_iter()
        .filter(|n| !dataset.schema().contains(n))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::SchemaMismatch(format!(
            "{} dataset is missing field(s): {}",
            dataset.role,
            missing.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one record per line.
/// A column is `Int64` when every non-empty cell parses as an integer,
/// otherwise `Float64`; an empty cell is a null.
fn csv_schema(path: &Path) -> Result<Schema> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(PipelineError::SchemaMismatch(format!(
            "{}: missing CSV header",
            path.display()
        )));
    }

    let mut integer = vec![true; headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() != headers.len() {
            return Err(PipelineError::SchemaMismatch(format!(
                "CSV row {row_no}: {} cells, header has {}",
                record.len(),
                headers.len()
            )));
        }
        for (col, cell) in record.iter().enumerate() {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            if cell.parse::<i64>().is_ok() {
                continue;
            }
            if cell.parse::<f64>().is_ok() {
                integer[col] = false;
            } else {
                return Err(PipelineError::SchemaMismatch(format!(
                    "CSV row {row_no}, column '{}': '{cell}' is not numeric",
                    headers[col]
                )));
            }
        }
    }

    let fields = headers
        .into_iter()
        .zip(integer)
        .map(|(name, is_int)| {
            let ty = if is_int {
                FieldType::Int64
            } else {
                FieldType::Float64
            };
            Field::new(name, ty)
        })
        .collect();
    Schema::new(fields)
}

fn read_csv(source: &TableSource) -> Result<Vec<EventRecord>> {
    let mut reader = csv::Reader::from_path(&source.path)?;
    let types: Vec<FieldType> = source.schema.fields().iter().map(|f| f.ty).collect();
    let mut records = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        let values = record
            .iter()
            .zip(&types)
            .map(|(cell, ty)| parse_cell(cell.trim(), *ty, row_no))
            .collect::<Result<Vec<_>>>()?;
        records.push(EventRecord::new(values));
    }
    Ok(records)
}

fn parse_cell(cell: &str, ty: FieldType, row_no: usize) -> Result<FieldValue> {
    if cell.is_empty() {
        return Ok(FieldValue::Null);
    }
    let parsed = if ty.is_integer() {
        cell.parse::<i64>().ok().map(FieldValue::Int)
    } else {
        cell.parse::<f64>().ok().map(FieldValue::Float)
    };
    parsed.ok_or_else(|| {
        PipelineError::SchemaMismatch(format!("CSV row {row_no}: '{cell}' does not match {ty}"))
    })
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Expected schema: flat numeric columns. Narrow integers widen to `Int32`,
/// `UInt32` to `Int64`, booleans read as `Int32` 0/1. Anything else is a
/// schema mismatch.
fn parquet_schema(path: &Path) -> Result<Schema> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let fields = builder
        .schema()
        .fields()
        .iter()
        .map(|f| Ok(Field::new(f.name().clone(), field_type_of(f.name(), f.data_type())?)))
        .collect::<Result<Vec<_>>>()?;
    if fields.is_empty() {
        return Err(PipelineError::SchemaMismatch(format!(
            "{}: parquet file has no columns",
            path.display()
        )));
    }
    Schema::new(fields)
}

fn field_type_of(name: &str, dt: &DataType) -> Result<FieldType> {
    match dt {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::UInt8
        | DataType::UInt16
        | DataType::Boolean => Ok(FieldType::Int32),
        DataType::Int64 | DataType::UInt32 => Ok(FieldType::Int64),
        DataType::Float32 => Ok(FieldType::Float32),
        DataType::Float64 => Ok(FieldType::Float64),
        other => Err(PipelineError::SchemaMismatch(format!(
            "column '{name}' has unsupported type {other:?}"
        ))),
    }
}

fn read_parquet(source: &TableSource) -> Result<Vec<EventRecord>> {
    let file = File::open(&source.path).map_err(|e| PipelineError::io(&source.path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let total = builder.metadata().file_metadata().num_rows().max(0) as usize;
    let reader = builder.build()?;

    let mut records = Vec::with_capacity(total);
    for batch_result in reader {
        let batch = batch_result?;
        let n_rows = batch.num_rows();

        // Column-major → row-major.
        let columns = batch
            .columns()
            .iter()
            .map(column_values)
            .collect::<Result<Vec<_>>>()?;

        for row in 0..n_rows {
            records.push(EventRecord::new(
                columns.iter().map(|col| col[row]).collect(),
            ));
        }
    }
    Ok(records)
}

// -- Arrow helpers --

/// All values of one column, nulls as `FieldValue::Null`.
fn column_values(col: &ArrayRef) -> Result<Vec<FieldValue>> {
    let values = match col.data_type() {
        DataType::Int8 => prim_ints(col.as_primitive::<Int8Type>().iter(), i64::from),
        DataType::Int16 => prim_ints(col.as_primitive::<Int16Type>().iter(), i64::from),
        DataType::Int32 => prim_ints(col.as_primitive::<Int32Type>().iter(), i64::from),
        DataType::Int64 => prim_ints(col.as_primitive::<Int64Type>().iter(), |v| v),
        DataType::UInt8 => prim_ints(col.as_primitive::<UInt8Type>().iter(), i64::from),
        DataType::UInt16 => prim_ints(col.as_primitive::<UInt16Type>().iter(), i64::from),
        DataType::UInt32 => prim_ints(col.as_primitive::<UInt32Type>().iter(), i64::from),
        DataType::Boolean => col
            .as_boolean()
            .iter()
            .map(|v| v.map_or(FieldValue::Null, |b| FieldValue::Int(i64::from(b))))
            .collect(),
        DataType::Float32 => col
            .as_primitive::<Float32Type>()
            .iter()
            .map(|v| v.map_or(FieldValue::Null, |f| FieldValue::Float(f64::from(f))))
            .collect(),
        DataType::Float64 => col
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.map_or(FieldValue::Null, FieldValue::Float))
            .collect(),
        other => {
            return Err(PipelineError::SchemaMismatch(format!(
                "unsupported column type {other:?}"
            )))
        }
    };
    Ok(values)
}

fn prim_ints<T>(iter: impl Iterator<Item = Option<T>>, widen: impl Fn(T) -> i64) -> Vec<FieldValue> {
    iter.map(|v| v.map_or(FieldValue::Null, |x| FieldValue::Int(widen(x))))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_is_dataset_not_found() {
        let err = open(Path::new("/definitely/not/here.parquet")).unwrap_err();
        assert!(matches!(err, PipelineError::DatasetNotFound { .. }));
    }

    #[test]
    fn csv_types_are_inferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "Bmass,JpsiTriggers,BDT").unwrap();
        writeln!(f, "5.37,1,0.25").unwrap();
        writeln!(f, "5.41,0,").unwrap();
        drop(f);

        let ds = load_dataset(&path, Role::Signal, 1.0).unwrap();
        let types: Vec<FieldType> = ds.schema().fields().iter().map(|f| f.ty).collect();
        assert_eq!(
            types,
            vec![FieldType::Float64, FieldType::Int64, FieldType::Float64]
        );
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.records()[1].get(1), Some(FieldValue::Int(0)));
        assert_eq!(ds.records()[1].get(2), Some(FieldValue::Null));
    }

    #[test]
    fn non_numeric_csv_column_is_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "run,label\n1,abc\n").unwrap();
        assert!(matches!(open(&path), Err(PipelineError::SchemaMismatch(_))));
    }

    #[test]
    fn unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.root");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(open(&path), Err(PipelineError::SchemaMismatch(_))));
    }

    #[test]
    fn require_fields_lists_what_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        let ds = load_dataset(&path, Role::Background, 1.0).unwrap();
        assert!(require_fields(&ds, ["a", "b"]).is_ok());
        match require_fields(&ds, ["a", "Q2", "Bmass"]) {
            Err(PipelineError::SchemaMismatch(msg)) => assert!(msg.contains("Q2, Bmass")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
