use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use log::debug;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use super::loader::TableFormat;
use super::model::{Dataset, FieldType, FieldValue};
use crate::error::{PipelineError, Result};
use crate::scan::ScanResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Fail if the target exists.
    Create,
    #[default]
    Overwrite,
}

/// Write `dataset` to `path`, format chosen by extension.
///
/// Output goes to a sibling `.partial` file first and is renamed into place
/// once complete, so a failed write never leaves a truncated target behind.
pub fn write_dataset(path: &Path, dataset: &Dataset, mode: WriteMode) -> Result<()> {
    let format = TableFormat::from_path(path)?;
    with_staged_file(path, mode, |file| match format {
        TableFormat::Parquet => write_parquet(file, dataset),
        TableFormat::Csv => write_csv(file, dataset),
    })?;
    debug!("wrote {} records to {}", dataset.len(), path.display());
    Ok(())
}

#[derive(Debug, Serialize)]
struct CurveRow {
    threshold: f64,
    fom: f64,
}

/// Write the `(threshold, fom)` curve as a two-column CSV.
pub fn write_scan_curve(path: &Path, result: &ScanResult, mode: WriteMode) -> Result<()> {
    with_staged_file(path, mode, |file| {
        let mut writer = csv::Writer::from_writer(file);
        for point in result.points() {
            writer.serialize(CurveRow {
                threshold: point.threshold,
                fom: point.fom,
            })?;
        }
        writer.flush().map_err(|e| PipelineError::io(path, e))?;
        Ok(())
    })
}

/// Write `value` as pretty-printed JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T, mode: WriteMode) -> Result<()> {
    with_staged_file(path, mode, |file| {
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, value)?;
        out.flush().map_err(|e| PipelineError::io(path, e))
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

fn with_staged_file(
    path: &Path,
    mode: WriteMode,
    write: impl FnOnce(File) -> Result<()>,
) -> Result<()> {
    if mode == WriteMode::Create && path.exists() {
        return Err(PipelineError::OutputExists {
            path: path.to_path_buf(),
        });
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let staged = staging_path(path);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&staged)
        .map_err(|e| PipelineError::io(&staged, e))?;

    let outcome = write(file).and_then(|()| {
        fs::rename(&staged, path).map_err(|e| PipelineError::io(path, e))
    });
    if outcome.is_err() {
        let _ = fs::remove_file(&staged);
    }
    outcome
}

// ---------------------------------------------------------------------------
// Parquet writer
// ---------------------------------------------------------------------------

fn write_parquet(file: File, dataset: &Dataset) -> Result<()> {
    let batch = to_record_batch(dataset)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// One nullable Arrow column per field.
pub fn to_record_batch(dataset: &Dataset) -> Result<RecordBatch> {
    let schema = dataset.schema();
    let arrow_schema = Arc::new(ArrowSchema::new(
        schema
            .fields()
            .iter()
            .map(|f| ArrowField::new(f.name.clone(), arrow_type(f.ty), true))
            .collect::<Vec<_>>(),
    ));

    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(col, field)| build_column(dataset, col, field.ty))
        .collect();

    Ok(RecordBatch::try_new(arrow_schema, columns)?)
}

fn arrow_type(ty: FieldType) -> DataType {
    match ty {
        FieldType::Int32 => DataType::Int32,
        FieldType::Int64 => DataType::Int64,
        FieldType::Float32 => DataType::Float32,
        FieldType::Float64 => DataType::Float64,
    }
}

fn build_column(dataset: &Dataset, col: usize, ty: FieldType) -> ArrayRef {
    let cells = dataset.records().iter().map(|r| r.get(col).unwrap_or(FieldValue::Null));
    match ty {
        FieldType::Int32 => Arc::new(
            cells
                .map(|v| as_int(v).and_then(|i| i32::try_from(i).ok()))
                .collect::<Int32Array>(),
        ),
        FieldType::Int64 => Arc::new(cells.map(as_int).collect::<Int64Array>()),
        FieldType::Float32 => Arc::new(
            cells
                .map(|v| as_float(v).map(|f| f as f32))
                .collect::<Float32Array>(),
        ),
        FieldType::Float64 => Arc::new(cells.map(as_float).collect::<Float64Array>()),
    }
}

fn as_int(v: FieldValue) -> Option<i64> {
    match v {
        FieldValue::Int(i) => Some(i),
        FieldValue::Float(f) if f.is_finite() => Some(f as i64),
        _ => None,
    }
}

fn as_float(v: FieldValue) -> Option<f64> {
    match v {
        FieldValue::Null => None,
        other => Some(other.as_f64()),
    }
}

// ---------------------------------------------------------------------------
// CSV writer
// ---------------------------------------------------------------------------

fn write_csv(file: File, dataset: &Dataset) -> Result<()> {
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(dataset.schema().names())?;
    for record in dataset.records() {
        writer.write_record(record.values().iter().map(|v| match v {
            FieldValue::Null => String::new(),
            other => other.to_string(),
        }))?;
    }
    writer.flush().map_err(|e| PipelineError::io("csv output", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::load_dataset;
    use crate::data::model::{EventRecord, Field, Role, Schema};

    fn sample() -> Dataset {
        let schema = Arc::new(
            Schema::new(vec![
                Field::new("trig", FieldType::Int32),
                Field::new("nevt", FieldType::Int64),
                Field::new("iso", FieldType::Float32),
                Field::new("BDT", FieldType::Float64),
            ])
            .unwrap(),
        );
        let records = vec![
            EventRecord::new(vec![
                FieldValue::Int(1),
                FieldValue::Int(7),
                FieldValue::Float(0.5),
                FieldValue::Float(0.125),
            ]),
            EventRecord::new(vec![
                FieldValue::Int(0),
                FieldValue::Null,
                FieldValue::Float(2.0),
                FieldValue::Float(-0.75),
            ]),
        ];
        Dataset::new(Role::Signal, 1.0, schema, records).unwrap()
    }

    #[test]
    fn parquet_keeps_schema_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let ds = sample();
        write_dataset(&path, &ds, WriteMode::Create).unwrap();

        let back = load_dataset(&path, Role::Signal, 1.0).unwrap();
        assert_eq!(back.schema(), ds.schema());
        assert_eq!(back.records(), ds.records());
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn create_mode_refuses_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "keep me").unwrap();
        let err = write_dataset(&path, &sample(), WriteMode::Create).unwrap_err();
        assert!(matches!(err, PipelineError::OutputExists { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn csv_output_has_header_and_empty_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_dataset(&path, &sample(), WriteMode::Overwrite).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "trig,nevt,iso,BDT");
        assert_eq!(lines[1], "1,7,0.5,0.125");
        assert_eq!(lines[2], "0,,2,-0.75");
    }

    #[test]
    fn json_is_staged_and_respects_create_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");
        write_json(&path, &serde_json::json!({"points": 4}), WriteMode::Create).unwrap();
        assert!(!staging_path(&path).exists());

        let back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["points"], 4);

        let err = write_json(&path, &serde_json::json!({}), WriteMode::Create).unwrap_err();
        assert!(matches!(err, PipelineError::OutputExists { .. }));
    }
}
