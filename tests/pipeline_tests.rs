use std::fs;
use std::path::Path;

use sigscan::config::AnalysisConfig;
use sigscan::data::loader::load_dataset;
use sigscan::data::model::Role;
use sigscan::pipeline;
use sigscan::scan::CancelToken;
use sigscan::PipelineError;

const SIGNAL: [f64; 10] = [-0.9, -0.5, 0.0, 0.1, 0.2, 0.3, 0.4, 0.6, 0.8, 0.95];
const BACKGROUND: [f64; 10] = [-0.95, -0.6, -0.3, -0.1, 0.05, 0.15, 0.25, 0.5, 0.7, 0.9];

/// `x,y,Bmass,cat` rows whose derived `max(x, y)` equals the given score,
/// plus one row with an empty `x` that must be excluded.
fn write_table(path: &Path, scores: &[f64]) {
    let mut text = String::from("x,y,Bmass,cat\n");
    for s in scores {
        text.push_str(&format!("{s},-5,5.3,1\n"));
    }
    text.push_str(",-5,5.3,1\n");
    fs::write(path, text).unwrap();
}

fn analysis(extra_output: &str, scan_extra: &str) -> String {
    format!(
        r#"
[signal]
path = "signal.csv"

[background]
path = "background.csv"

[derive]
require = ["Bmass"]

[[derive.fields]]
name = "maxxy"
expr = "max(x, y)"

[models]
dir = "weights"

[models.methods]
F = true

[cuts]
signal = "cat == 1"

[scan]
score = "F"
lo = 0.0
hi = 1.0
steps = 4
{scan_extra}

[output]
curve = "out/fom.csv"
report = "out/report.json"
selected_signal = "out/signal_selected.parquet"
augmented_signal = "out/signal_augmented.csv"
{extra_output}
"#
    )
}

fn setup(extra_output: &str, scan_extra: &str) -> (tempfile::TempDir, AnalysisConfig) {
    let dir = tempfile::tempdir().unwrap();
    write_table(&dir.path().join("signal.csv"), &SIGNAL);
    write_table(&dir.path().join("background.csv"), &BACKGROUND);
    fs::create_dir_all(dir.path().join("weights")).unwrap();
    fs::write(
        dir.path().join("weights/TMVAClassification_F.weights.json"),
        r#"{"kind": "fisher", "method": "F", "inputs": ["maxxy"], "coefficients": [1.0]}"#,
    )
    .unwrap();

    let toml_path = dir.path().join("analysis.toml");
    fs::write(&toml_path, analysis(extra_output, scan_extra)).unwrap();
    let config = AnalysisConfig::load(&toml_path).unwrap();
    (dir, config)
}

#[test]
fn end_to_end_finds_operating_point_and_exports() {
    let (dir, config) = setup("", "");
    let report = pipeline::run(&config, &CancelToken::new()).unwrap();

    assert!(report.complete);
    assert_eq!(report.points, 4);
    assert_eq!(report.methods, vec!["F"]);

    let op = report.operating_point.unwrap();
    assert_eq!(op.threshold, 0.0);
    assert!((op.fom - 8.0 / 14f64.sqrt()).abs() < 1e-12);

    assert_eq!(report.signal.records_read, 11);
    assert_eq!(report.signal.exclusions.total, 1);
    assert_eq!(report.signal.exclusions.by_field.get("x"), Some(&1));
    assert_eq!(report.signal.counted, 10);

    let selected = report.signal.selected.as_ref().unwrap();
    assert_eq!(selected.before, 10);
    assert_eq!(selected.after, 8);
    assert!(report.background.selected.is_none());

    let reread = load_dataset(&dir.path().join("out/signal_selected.parquet"), Role::Signal, 1.0)
        .unwrap();
    assert_eq!(reread.len(), 8);
    assert!(reread.schema().contains("maxxy"));
    assert!(reread.schema().contains("F"));

    let curve = fs::read_to_string(dir.path().join("out/fom.csv")).unwrap();
    let mut lines = curve.lines();
    assert_eq!(lines.next(), Some("threshold,fom"));
    assert_eq!(lines.count(), 4);

    let augmented = fs::read_to_string(dir.path().join("out/signal_augmented.csv")).unwrap();
    assert!(augmented.starts_with("x,y,Bmass,cat,maxxy,F"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out/report.json")).unwrap())
            .unwrap();
    assert_eq!(json["signal"]["counted"], 10);
    assert_eq!(json["operating_point"]["threshold"], 0.0);
}

#[test]
fn strategies_and_workers_do_not_change_the_report() {
    let (_a, cumulative) = setup("", "");
    let (_b, rescan) = setup("", "strategy = \"rescan\"\nworkers = 3");

    let left = pipeline::run(&cumulative, &CancelToken::new()).unwrap();
    let right = pipeline::run(&rescan, &CancelToken::new()).unwrap();
    assert_eq!(left.operating_point, right.operating_point);
    assert_eq!(left.points, right.points);
}

#[test]
fn cancelled_run_writes_partial_curve_and_no_selection() {
    let (dir, config) = setup("", "");
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = pipeline::run(&config, &cancel).unwrap();
    assert!(!report.complete);
    assert!(report.operating_point.is_none());
    assert!(report.signal.selected.is_none());
    assert!(!dir.path().join("out/signal_selected.parquet").exists());
    assert!(dir.path().join("out/fom.csv").exists());
}

#[test]
fn create_mode_refuses_to_overwrite() {
    let (dir, config) = setup("mode = \"create\"", "");
    pipeline::run(&config, &CancelToken::new()).unwrap();

    let report = dir.path().join("out/report.json");
    let before = fs::read_to_string(&report).unwrap();
    fs::remove_file(dir.path().join("out/fom.csv")).unwrap();

    match pipeline::run(&config, &CancelToken::new()) {
        Err(PipelineError::OutputExists { path }) => {
            assert!(path.starts_with(dir.path().join("out")))
        }
        other => panic!("expected OutputExists, got {:?}", other.map(|r| r.points)),
    }
    // Refused up front: the removed curve is not rewritten.
    assert!(!dir.path().join("out/fom.csv").exists());
    assert_eq!(fs::read_to_string(&report).unwrap(), before);
}

#[test]
fn report_is_written_without_staging_leftovers() {
    let (dir, config) = setup("", "");
    pipeline::run(&config, &CancelToken::new()).unwrap();
    assert!(dir.path().join("out/report.json").exists());
    let leftovers = fs::read_dir(dir.path().join("out"))
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".partial")
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn missing_dataset_is_reported_before_any_output() {
    let (dir, config) = setup("augmented_background = \"out/background_augmented.csv\"", "");
    fs::remove_file(dir.path().join("background.csv")).unwrap();
    assert!(matches!(
        pipeline::run(&config, &CancelToken::new()),
        Err(PipelineError::DatasetNotFound { .. })
    ));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn missing_required_field_is_reported_before_any_output() {
    let (dir, config) = setup("", "");
    fs::write(dir.path().join("background.csv"), "x,y,cat\n0.5,-5,1\n").unwrap();
    assert!(matches!(
        pipeline::run(&config, &CancelToken::new()),
        Err(PipelineError::SchemaMismatch(_))
    ));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn invalid_scan_settings_fail_before_any_output() {
    let (dir, mut config) = setup("augmented_background = \"out/background_augmented.csv\"", "");
    config.scan.steps = 0;
    assert!(matches!(
        pipeline::run(&config, &CancelToken::new()),
        Err(PipelineError::Config(_))
    ));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn bad_cut_syntax_fails_before_any_output() {
    let (dir, mut config) = setup("", "");
    config.cuts.background = Some("Bmass <".into());
    assert!(matches!(
        pipeline::run(&config, &CancelToken::new()),
        Err(PipelineError::Parse { .. })
    ));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn unknown_cut_field_fails_before_writing() {
    let (dir, mut config) = setup("", "");
    config.cuts.background = Some("nope > 1".into());
    assert!(matches!(
        pipeline::run(&config, &CancelToken::new()),
        Err(PipelineError::PredicateFieldUnknown { field }) if field == "nope"
    ));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn missing_model_file_is_model_load_error() {
    let (dir, config) = setup("", "");
    fs::remove_file(dir.path().join("weights/TMVAClassification_F.weights.json")).unwrap();
    assert!(matches!(
        pipeline::run(&config, &CancelToken::new()),
        Err(PipelineError::ModelLoad { .. })
    ));
}
