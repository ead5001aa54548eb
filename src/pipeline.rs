//! One full selection run: load → derive → score → scan → export.

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::classifier::ScorerSet;
use crate::config::{AnalysisConfig, DatasetConfig, OutputConfig};
use crate::data::loader;
use crate::data::model::{Dataset, Role};
use crate::data::writer::{self, WriteMode};
use crate::error::{PipelineError, Result};
use crate::export::{self, ExportSummary};
use crate::features::{ExclusionStats, FeatureDeriver};
use crate::scan::{CancelToken, CutTemplate, OperatingPoint, ScanState, Scanner};

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub role: Role,
    pub path: PathBuf,
    pub weight: f64,
    pub records_read: usize,
    pub exclusions: ExclusionStats,
    /// Records that reached the scorer.
    pub counted: usize,
    pub selected: Option<ExportSummary>,
}

/// Summary of a run, also written as JSON when `output.report` is set.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub signal: DatasetReport,
    pub background: DatasetReport,
    pub methods: Vec<String>,
    pub score_field: String,
    /// `false` if the scan was cancelled before the last threshold.
    pub complete: bool,
    pub points: usize,
    pub operating_point: Option<OperatingPoint>,
    pub curve: PathBuf,
}

/// Run the whole chain described by `config`.
///
/// Everything that can be checked up front is checked before the first
/// output is written: both datasets and their required fields, cut syntax,
/// scan settings, model inputs, cut and score fields against the scored
/// schemas, and existing targets in `create` mode.
///
/// A cancelled scan still writes the partial curve and the report, but
/// exports nothing.
pub fn run(config: &AnalysisConfig, cancel: &CancelToken) -> Result<RunReport> {
    let scorers = ScorerSet::load(&config.models.dir, &config.models.prefix, &config.models.methods)?;
    if scorers.is_empty() {
        info!("no classifier methods enabled; scanning existing '{}' field", config.scan.score);
    }

    let signal_raw = load(Role::Signal, &config.signal, config)?;
    let background_raw = load(Role::Background, &config.background, config)?;

    let mut scanner = Scanner::new(
        config.scan.to_scan_config(),
        CutTemplate::new(config.cuts.signal_predicate()?, config.scan.score.clone()),
        CutTemplate::new(config.cuts.background_predicate()?, config.scan.score.clone()),
    )?;

    let signal_deriver = plan(&signal_raw, scanner.signal_template(), config, &scorers)?;
    let background_deriver =
        plan(&background_raw, scanner.background_template(), config, &scorers)?;

    let mode = config.output.mode;
    if mode == WriteMode::Create {
        check_targets(&config.output)?;
    }

    let (signal, mut signal_report) = prepare(
        &signal_raw,
        &config.signal,
        &signal_deriver,
        &scorers,
        config.output.augmented_signal.as_deref(),
        mode,
    )?;
    let (background, mut background_report) = prepare(
        &background_raw,
        &config.background,
        &background_deriver,
        &scorers,
        config.output.augmented_background.as_deref(),
        mode,
    )?;

    let (result, complete) = match scanner.run(&signal, &background, cancel)? {
        ScanState::Completed(r) => (r.clone(), true),
        ScanState::Cancelled(r) => (r.clone(), false),
        ScanState::Configured | ScanState::Scanning => {
            return Err(PipelineError::ScanState {
                state: "unfinished",
                expected: "completed",
            })
        }
    };

    writer::write_scan_curve(&config.output.curve, &result, mode)?;
    info!("wrote {} scan points to {}", result.len(), config.output.curve.display());

    let operating_point = if complete { result.operating_point() } else { None };
    match operating_point {
        Some(op) => {
            signal_report.selected = export_selected(
                &signal,
                scanner.signal_template(),
                &op,
                config.output.selected_signal.as_deref(),
                mode,
            )?;
            background_report.selected = export_selected(
                &background,
                scanner.background_template(),
                &op,
                config.output.selected_background.as_deref(),
                mode,
            )?;
        }
        None => warn!("no operating point; selected datasets not written"),
    }

    let report = RunReport {
        signal: signal_report,
        background: background_report,
        methods: scorers.names().into_iter().map(String::from).collect(),
        score_field: config.scan.score.clone(),
        complete,
        points: result.len(),
        operating_point,
        curve: config.output.curve.clone(),
    };
    if let Some(path) = &config.output.report {
        writer::write_json(path, &report, mode)?;
        info!("report written to {}", path.display());
    }
    Ok(report)
}

/// Read one dataset and check the required fields are present.
fn load(role: Role, source: &DatasetConfig, config: &AnalysisConfig) -> Result<Dataset> {
    let raw = loader::load_dataset(&source.path, role, source.weight)?;
    loader::require_fields(&raw, config.derive.require.iter().map(String::as_str))?;
    Ok(raw)
}

/// Build the deriver for `raw` and check that the scan template binds
/// against the schema the scored records will have.
fn plan(
    raw: &Dataset,
    template: &CutTemplate,
    config: &AnalysisConfig,
    scorers: &ScorerSet,
) -> Result<FeatureDeriver> {
    // Model inputs that come straight from the file are checked like any
    // other required field; derived inputs are covered by their expressions.
    let mut required = config.derive.require.clone();
    for input in scorers.inputs() {
        if raw.schema().contains(input) && !required.iter().any(|r| r == input) {
            required.push(input.to_string());
        }
    }

    let deriver = FeatureDeriver::new(raw.schema().clone(), &config.derive.fields, &required)?;
    let scored = scorers.output_schema(deriver.output_schema())?;
    template.at(config.scan.lo).bind(&scored)?;
    Ok(deriver)
}

/// In `create` mode, fail before writing anything if a target exists.
fn check_targets(output: &OutputConfig) -> Result<()> {
    let targets = [
        Some(&output.curve),
        output.report.as_ref(),
        output.augmented_signal.as_ref(),
        output.augmented_background.as_ref(),
        output.selected_signal.as_ref(),
        output.selected_background.as_ref(),
    ];
    match targets.into_iter().flatten().find(|p| p.exists()) {
        Some(path) => Err(PipelineError::OutputExists { path: path.clone() }),
        None => Ok(()),
    }
}

/// Derive and score one dataset, optionally writing the augmented records.
fn prepare(
    raw: &Dataset,
    source: &DatasetConfig,
    deriver: &FeatureDeriver,
    scorers: &ScorerSet,
    augmented: Option<&Path>,
    mode: WriteMode,
) -> Result<(Dataset, DatasetReport)> {
    let (derived, exclusions) = deriver.derive_dataset(raw)?;
    let scored = scorers.score_dataset(&derived)?;

    if let Some(path) = augmented {
        writer::write_dataset(path, &scored, mode)?;
        info!("{}: augmented dataset written to {}", raw.role, path.display());
    }

    let report = DatasetReport {
        role: raw.role,
        path: source.path.clone(),
        weight: source.weight,
        records_read: raw.len(),
        exclusions,
        counted: scored.len(),
        selected: None,
    };
    Ok((scored, report))
}

fn export_selected(
    dataset: &Dataset,
    template: &CutTemplate,
    op: &OperatingPoint,
    path: Option<&Path>,
    mode: WriteMode,
) -> Result<Option<ExportSummary>> {
    path.map(|p| export::export(dataset, template, op, p, mode))
        .transpose()
}
