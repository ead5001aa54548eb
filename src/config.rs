use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::data::writer::WriteMode;
use crate::error::{PipelineError, Result};
use crate::expr::Predicate;
use crate::features::FeatureSpec;
use crate::scan::{ScanConfig, ScanStrategy};

// ---------------------------------------------------------------------------
// Analysis file (TOML)
// ---------------------------------------------------------------------------

/// Everything one selection run needs, read from a TOML file:
///
/// ```toml
/// [signal]
/// path = "sel_mc.parquet"
/// [background]
/// path = "sel_data.parquet"
///
/// [derive]
/// require = ["Bmass", "Mumumass"]
/// [[derive.fields]]
/// name = "maxkpt"
/// expr = "max(Kmpt, Kppt)"
///
/// [models]
/// dir = "weights"
/// [models.methods]
/// BDT = true
/// BDTG = false
///
/// [cuts]
/// signal = "JpsiTriggers == 1 && dr0 < 0.1"
///
/// [scan]
/// score = "BDT"
/// lo = -1.0
/// hi = 1.0
/// steps = 200
/// scale = 0.012874
///
/// [output]
/// curve = "fom.csv"
/// selected_signal = "sel_mc_final.parquet"
/// ```
///
/// Relative paths are resolved against the directory holding the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    pub signal: DatasetConfig,
    pub background: DatasetConfig,
    #[serde(default)]
    pub derive: DeriveConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub cuts: CutsConfig,
    pub scan: ScanSection,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub path: PathBuf,
    #[serde(default = "unit")]
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeriveConfig {
    /// Raw fields that must be defined for a record to be kept.
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FeatureSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    #[serde(default)]
    pub dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// `{method: enabled}`.
    #[serde(default)]
    pub methods: BTreeMap<String, bool>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        ModelsConfig {
            dir: PathBuf::new(),
            prefix: default_prefix(),
            methods: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CutsConfig {
    pub signal: Option<String>,
    pub background: Option<String>,
}

impl CutsConfig {
    pub fn signal_predicate(&self) -> Result<Option<Predicate>> {
        parse_optional(self.signal.as_deref())
    }

    pub fn background_predicate(&self) -> Result<Option<Predicate>> {
        parse_optional(self.background.as_deref())
    }
}

fn parse_optional(text: Option<&str>) -> Result<Option<Predicate>> {
    match text.map(str::trim) {
        None | Some("") => Ok(None),
        Some(t) => t.parse().map(Some),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanSection {
    /// Score field the threshold applies to.
    pub score: String,
    pub lo: f64,
    pub hi: f64,
    pub steps: usize,
    #[serde(default = "unit")]
    pub scale: f64,
    #[serde(default)]
    pub strategy: ScanStrategy,
    #[serde(default = "one")]
    pub workers: usize,
}

impl ScanSection {
    pub fn to_scan_config(&self) -> ScanConfig {
        ScanConfig {
            lo: self.lo,
            hi: self.hi,
            steps: self.steps,
            scale: self.scale,
            strategy: self.strategy,
            workers: self.workers,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// `(threshold, fom)` CSV.
    pub curve: PathBuf,
    pub report: Option<PathBuf>,
    pub augmented_signal: Option<PathBuf>,
    pub augmented_background: Option<PathBuf>,
    pub selected_signal: Option<PathBuf>,
    pub selected_background: Option<PathBuf>,
    #[serde(default)]
    pub mode: WriteMode,
}

fn unit() -> f64 {
    1.0
}

fn one() -> usize {
    1
}

fn default_prefix() -> String {
    "TMVAClassification".to_string()
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse `path`, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.signal.path);
        resolve(&mut self.background.path);
        resolve(&mut self.models.dir);
        resolve(&mut self.output.curve);
        for p in [
            &mut self.output.report,
            &mut self.output.augmented_signal,
            &mut self.output.augmented_background,
            &mut self.output.selected_signal,
            &mut self.output.selected_background,
        ]
        .into_iter()
        .flatten()
        {
            resolve(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [signal]
        path = "sig.parquet"
        [background]
        path = "bkg.csv"
        weight = 2.0

        [models.methods]
        BDT = true
        BDTG = false

        [cuts]
        signal = "dr0 < 0.1 && (Q2 < 8 || Q2 > 11)"
        background = "  "

        [scan]
        score = "BDT"
        lo = -1.0
        hi = 1.0
        steps = 200
        scale = 0.5

        [output]
        curve = "out/fom.csv"
        selected_signal = "/abs/sel.parquet"
    "#;

    #[test]
    fn defaults_and_resolution() {
        let mut cfg = AnalysisConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.signal.weight, 1.0);
        assert_eq!(cfg.background.weight, 2.0);
        assert_eq!(cfg.models.prefix, "TMVAClassification");
        assert_eq!(cfg.scan.strategy, ScanStrategy::Cumulative);
        assert_eq!(cfg.scan.workers, 1);
        assert_eq!(cfg.output.mode, WriteMode::Overwrite);

        cfg.resolve_paths(Path::new("/work"));
        assert_eq!(cfg.signal.path, Path::new("/work/sig.parquet"));
        assert_eq!(cfg.output.curve, Path::new("/work/out/fom.csv"));
        assert_eq!(
            cfg.output.selected_signal.as_deref(),
            Some(Path::new("/abs/sel.parquet"))
        );
    }

    #[test]
    fn cut_strings_become_predicates() {
        let cfg = AnalysisConfig::from_toml_str(MINIMAL).unwrap();
        assert!(cfg.cuts.signal_predicate().unwrap().is_some());
        assert!(cfg.cuts.background_predicate().unwrap().is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = MINIMAL.replace("steps = 200", "steps = 200\nnbins = 5");
        assert!(matches!(
            AnalysisConfig::from_toml_str(&text),
            Err(PipelineError::Toml(_))
        ));
    }
}
