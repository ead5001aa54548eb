use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::data::filter::{self, CutOutcome};
use crate::data::model::Dataset;
use crate::data::writer::{self, WriteMode};
use crate::error::Result;
use crate::scan::{CutTemplate, OperatingPoint};

/// Counts around one exported selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub before: usize,
    pub after: usize,
    pub weighted_after: f64,
}

/// Apply `template` at the operating point's threshold to the whole dataset
/// and write the passing records to `path`.
pub fn export(
    dataset: &Dataset,
    template: &CutTemplate,
    operating_point: &OperatingPoint,
    path: &Path,
    mode: WriteMode,
) -> Result<ExportSummary> {
    let predicate = template.at(operating_point.threshold);
    let CutOutcome { count, subset } = filter::evaluate(dataset, &predicate, true)?;
    let selected = subset.unwrap_or_else(|| dataset.subset(&[]));

    writer::write_dataset(path, &selected, mode)?;

    info!(
        "{}: {} -> {} records with {predicate}, written to {}",
        dataset.role,
        dataset.len(),
        count.unweighted,
        path.display()
    );
    Ok(ExportSummary {
        path: path.to_path_buf(),
        before: dataset.len(),
        after: count.unweighted,
        weighted_after: count.weighted,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::loader::load_dataset;
    use crate::data::model::{EventRecord, Field, FieldType, FieldValue, Role, Schema};

    fn dataset() -> Dataset {
        let schema = Arc::new(
            Schema::new(vec![
                Field::new("Phimass", FieldType::Float64),
                Field::new("BDT", FieldType::Float64),
            ])
            .unwrap(),
        );
        let records = (0..20)
            .map(|i| {
                EventRecord::new(vec![
                    FieldValue::Float(1.3 + 0.02 * i as f64),
                    FieldValue::Float(-1.0 + 0.1 * i as f64),
                ])
            })
            .collect();
        Dataset::new(Role::Signal, 1.0, schema, records).unwrap()
    }

    #[test]
    fn reexport_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let template = CutTemplate::new(Some("Phimass < 1.525+2.5*0.079".parse().unwrap()), "BDT");
        let op = OperatingPoint {
            threshold: 0.05,
            fom: 1.0,
        };

        let first_path = dir.path().join("first.parquet");
        let first = export(&dataset(), &template, &op, &first_path, WriteMode::Create).unwrap();
        assert_eq!(first.before, 20);
        assert!(first.after > 0 && first.after < first.before);

        let reread = load_dataset(&first_path, Role::Signal, 1.0).unwrap();
        let second_path = dir.path().join("second.parquet");
        let second = export(&reread, &template, &op, &second_path, WriteMode::Create).unwrap();
        assert_eq!(second.before, first.after);
        assert_eq!(second.after, first.after);
    }

    #[test]
    fn summary_matches_cut_evaluator() {
        let dir = tempfile::tempdir().unwrap();
        let mut ds = dataset();
        ds.weight = 2.0;
        let template = CutTemplate::new(Some("Phimass >= 1.4".parse().unwrap()), "BDT");
        let op = OperatingPoint {
            threshold: 0.5,
            fom: 1.0,
        };

        let expected = filter::count(&ds, &template.at(op.threshold)).unwrap();
        let path = dir.path().join("sel.csv");
        let summary = export(&ds, &template, &op, &path, WriteMode::Overwrite).unwrap();
        assert_eq!(summary.after, expected.unweighted);
        assert_eq!(summary.weighted_after, expected.weighted);

        let written = load_dataset(&path, Role::Signal, 1.0).unwrap();
        assert_eq!(written.len(), expected.unweighted);
    }
}
