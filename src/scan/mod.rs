//! Significance scan over a classifier-score threshold.
//!
//! For `n` evenly spaced thresholds `t_i = lo + i·(hi−lo)/n` the scanner
//! counts signal and background passing `cuts && score >= t_i`, scales the
//! signal yield, and computes `S/sqrt(S+B)`. The operating point is the
//! highest figure of merit, ties going to the smallest threshold.

pub mod counter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::data::model::Dataset;
use crate::error::{PipelineError, Result};
use crate::expr::{CmpOp, Predicate};

use counter::{CumulativeCounter, RescanCounter, YieldCounter};

// ---------------------------------------------------------------------------
// Cut template: static cuts && score >= t
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CutTemplate {
    pub cuts: Option<Predicate>,
    pub score_field: String,
}

impl CutTemplate {
    pub fn new(cuts: Option<Predicate>, score_field: impl Into<String>) -> Self {
        CutTemplate {
            cuts,
            score_field: score_field.into(),
        }
    }

    /// The full predicate at threshold `t`.
    pub fn at(&self, t: f64) -> Predicate {
        let score_cut = Predicate::compare(self.score_field.clone(), CmpOp::Ge, t);
        match &self.cuts {
            Some(cuts) => cuts.clone().and(score_cut),
            None => score_cut,
        }
    }
}

// ---------------------------------------------------------------------------
// Figure of merit
// ---------------------------------------------------------------------------

/// `S/sqrt(S+B)`, with `0` when both yields are zero.
pub fn figure_of_merit(signal: f64, background: f64) -> f64 {
    if signal == 0.0 && background == 0.0 {
        return 0.0;
    }
    signal / (signal + background).sqrt()
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStrategy {
    /// Re-evaluate the whole cut on both datasets per threshold.
    Rescan,
    /// Sort surviving scores once, binary-search per threshold.
    #[default]
    Cumulative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub lo: f64,
    pub hi: f64,
    pub steps: usize,
    /// Multiplies the weighted signal count.
    pub scale: f64,
    pub strategy: ScanStrategy,
    pub workers: usize,
}

impl ScanConfig {
    pub fn new(lo: f64, hi: f64, steps: usize) -> Self {
        ScanConfig {
            lo,
            hi,
            steps,
            scale: 1.0,
            strategy: ScanStrategy::default(),
            workers: 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(PipelineError::Config("scan needs at least one step".into()));
        }
        if !self.lo.is_finite() || !self.hi.is_finite() || self.lo >= self.hi {
            return Err(PipelineError::Config(format!(
                "threshold range [{}, {}] must be finite with lo < hi",
                self.lo, self.hi
            )));
        }
        if !self.scale.is_finite() || self.scale < 0.0 {
            return Err(PipelineError::Config(format!(
                "scale factor {} must be finite and non-negative",
                self.scale
            )));
        }
        let thresholds = self.thresholds();
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::Config(format!(
                "range [{}, {}] is too narrow for {} steps",
                self.lo, self.hi, self.steps
            )));
        }
        Ok(())
    }

    /// `lo + i·(hi−lo)/n` for `i` in `0..n`.
    pub fn thresholds(&self) -> Vec<f64> {
        let n = self.steps as f64;
        (0..self.steps)
            .map(|i| self.lo + i as f64 * (self.hi - self.lo) / n)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanPoint {
    pub threshold: f64,
    pub signal_count: usize,
    /// Weighted signal count times the scale factor.
    pub signal_yield: f64,
    pub background_count: usize,
    pub background_yield: f64,
    pub fom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OperatingPoint {
    pub threshold: f64,
    pub fom: f64,
}

/// Scan points in ascending threshold order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanResult {
    points: Vec<ScanPoint>,
}

impl ScanResult {
    fn from_unsorted(mut points: Vec<ScanPoint>) -> Self {
        points.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
        ScanResult { points }
    }

    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `(threshold, fom)` pairs for plotting.
    pub fn curve(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().map(|p| (p.threshold, p.fom))
    }

    /// Highest fom; the first (smallest-threshold) one on ties.
    pub fn operating_point(&self) -> Option<OperatingPoint> {
        let mut best: Option<&ScanPoint> = None;
        for p in &self.points {
            if best.map_or(true, |b| p.fom > b.fom) {
                best = Some(p);
            }
        }
        best.map(|p| OperatingPoint {
            threshold: p.threshold,
            fom: p.fom,
        })
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag checked between thresholds.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ScanState {
    Configured,
    Scanning,
    Completed(ScanResult),
    /// Interrupted; holds the points computed before the interruption.
    Cancelled(ScanResult),
}

impl ScanState {
    fn label(&self) -> &'static str {
        match self {
            ScanState::Configured => "configured",
            ScanState::Scanning => "scanning",
            ScanState::Completed(_) => "completed",
            ScanState::Cancelled(_) => "cancelled",
        }
    }
}

pub struct Scanner {
    config: ScanConfig,
    signal: CutTemplate,
    background: CutTemplate,
    state: ScanState,
}

impl Scanner {
    pub fn new(config: ScanConfig, signal: CutTemplate, background: CutTemplate) -> Result<Self> {
        config.validate()?;
        Ok(Scanner {
            config,
            signal,
            background,
            state: ScanState::Configured,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn signal_template(&self) -> &CutTemplate {
        &self.signal
    }

    pub fn background_template(&self) -> &CutTemplate {
        &self.background
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// The full scan; `None` unless the scanner completed.
    pub fn result(&self) -> Option<&ScanResult> {
        match &self.state {
            ScanState::Completed(r) => Some(r),
            _ => None,
        }
    }

    /// Points computed before a cancellation.
    pub fn partial(&self) -> Option<&ScanResult> {
        match &self.state {
            ScanState::Cancelled(r) => Some(r),
            _ => None,
        }
    }

    pub fn operating_point(&self) -> Option<OperatingPoint> {
        self.result().and_then(ScanResult::operating_point)
    }

    /// Run the sweep over both datasets. Only valid from `Configured`.
    ///
    /// Field errors surface before any threshold is evaluated and leave the
    /// scanner `Configured`.
    pub fn run(
        &mut self,
        signal: &Dataset,
        background: &Dataset,
        cancel: &CancelToken,
    ) -> Result<&ScanState> {
        if !matches!(self.state, ScanState::Configured) {
            return Err(PipelineError::ScanState {
                state: self.state.label(),
                expected: "configured",
            });
        }
        for ds in [signal, background] {
            if !ds.weight.is_finite() || ds.weight < 0.0 {
                return Err(PipelineError::Config(format!(
                    "{} weight {} must be finite and non-negative",
                    ds.role, ds.weight
                )));
            }
        }

        let points = match self.config.strategy {
            ScanStrategy::Rescan => {
                let sig = RescanCounter::new(signal, &self.signal)?;
                let bkg = RescanCounter::new(background, &self.background)?;
                self.state = ScanState::Scanning;
                self.sweep(&sig, &bkg, cancel)
            }
            ScanStrategy::Cumulative => {
                let sig = CumulativeCounter::new(signal, &self.signal)?;
                let bkg = CumulativeCounter::new(background, &self.background)?;
                self.state = ScanState::Scanning;
                self.sweep(&sig, &bkg, cancel)
            }
        };

        let points = match points {
            Ok(p) => p,
            Err(e) => {
                self.state = ScanState::Configured;
                return Err(e);
            }
        };

        let result = ScanResult::from_unsorted(points);
        self.state = if result.len() == self.config.steps {
            if let Some(op) = result.operating_point() {
                info!(
                    "max. significance {:.4} at {} >= {}",
                    op.fom, self.signal.score_field, op.threshold
                );
            }
            ScanState::Completed(result)
        } else {
            warn!(
                "scan cancelled after {} of {} thresholds",
                result.len(),
                self.config.steps
            );
            ScanState::Cancelled(result)
        };
        Ok(&self.state)
    }

    fn sweep(
        &self,
        sig: &dyn YieldCounter,
        bkg: &dyn YieldCounter,
        cancel: &CancelToken,
    ) -> Result<Vec<ScanPoint>> {
        let thresholds = self.config.thresholds();
        let workers = self.config.workers.clamp(1, thresholds.len());
        if workers == 1 {
            return self.sweep_chunk(&thresholds, sig, bkg, cancel);
        }

        let chunk_len = thresholds.len().div_ceil(workers);
        let joined = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = thresholds
                .chunks(chunk_len)
                .map(|chunk| scope.spawn(move |_| self.sweep_chunk(chunk, sig, bkg, cancel)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| PipelineError::WorkerPanicked))
                .collect::<Vec<_>>()
        })
        .map_err(|_| PipelineError::WorkerPanicked)?;

        let mut points = Vec::with_capacity(thresholds.len());
        for chunk in joined {
            points.extend(chunk??);
        }
        Ok(points)
    }

    fn sweep_chunk(
        &self,
        thresholds: &[f64],
        sig: &dyn YieldCounter,
        bkg: &dyn YieldCounter,
        cancel: &CancelToken,
    ) -> Result<Vec<ScanPoint>> {
        let mut points = Vec::with_capacity(thresholds.len());
        for &t in thresholds {
            if cancel.is_cancelled() {
                break;
            }
            let s = sig.count(t)?;
            let b = bkg.count(t)?;
            let signal_yield = s.weighted * self.config.scale;
            if !signal_yield.is_finite() || !b.weighted.is_finite() {
                return Err(PipelineError::Config(format!(
                    "yields overflow at t = {t}: S = {signal_yield}, B = {}",
                    b.weighted
                )));
            }
            let fom = figure_of_merit(signal_yield, b.weighted);
            debug!(
                "t = {t:.4}: S = {} x {} = {signal_yield:.4}, B = {:.4}, S/sqrt(S+B) = {fom:.4}",
                s.weighted, self.config.scale, b.weighted
            );
            points.push(ScanPoint {
                threshold: t,
                signal_count: s.unweighted,
                signal_yield,
                background_count: b.unweighted,
                background_yield: b.weighted,
                fom,
            });
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{EventRecord, Field, FieldType, FieldValue, Role, Schema};

    const SIGNAL: [f64; 10] = [-0.9, -0.5, 0.0, 0.1, 0.2, 0.3, 0.4, 0.6, 0.8, 0.95];
    const BACKGROUND: [f64; 10] = [-0.95, -0.6, -0.3, -0.1, 0.05, 0.15, 0.25, 0.5, 0.7, 0.9];

    fn scores(role: Role, values: &[f64]) -> Dataset {
        let schema = Arc::new(Schema::new(vec![Field::new("BDT", FieldType::Float64)]).unwrap());
        let records = values
            .iter()
            .map(|v| EventRecord::new(vec![FieldValue::Float(*v)]))
            .collect();
        Dataset::new(role, 1.0, schema, records).unwrap()
    }

    fn scanner(config: ScanConfig) -> Scanner {
        Scanner::new(
            config,
            CutTemplate::new(None, "BDT"),
            CutTemplate::new(None, "BDT"),
        )
        .unwrap()
    }

    fn run(config: ScanConfig) -> ScanResult {
        let mut s = scanner(config);
        s.run(
            &scores(Role::Signal, &SIGNAL),
            &scores(Role::Background, &BACKGROUND),
            &CancelToken::new(),
        )
        .unwrap();
        s.result().unwrap().clone()
    }

    #[test]
    fn degenerate_fom_is_zero() {
        assert_eq!(figure_of_merit(0.0, 0.0), 0.0);
        assert_eq!(figure_of_merit(0.0, 5.0), 0.0);
        assert_eq!(figure_of_merit(4.0, 0.0), 2.0);
    }

    #[test]
    fn quarter_steps_on_unit_range() {
        let result = run(ScanConfig::new(0.0, 1.0, 4));
        let summary: Vec<(f64, usize, usize)> = result
            .points()
            .iter()
            .map(|p| (p.threshold, p.signal_count, p.background_count))
            .collect();
        assert_eq!(
            summary,
            vec![(0.0, 8, 6), (0.25, 5, 4), (0.5, 3, 3), (0.75, 2, 1)]
        );
        let op = result.operating_point().unwrap();
        assert_eq!(op.threshold, 0.0);
        assert!((op.fom - 8.0 / 14f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn concrete_point_at_first_threshold() {
        let result = run(ScanConfig::new(0.2, 1.2, 5));
        let first = result.points()[0];
        assert_eq!(first.threshold, 0.2);
        assert_eq!(first.signal_count, 6);
        assert_eq!(first.background_count, 4);
        assert!((first.fom - 6.0 / 10f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn empty_region_gives_zero_not_nan() {
        let result = run(ScanConfig::new(0.96, 2.0, 8));
        assert!(result.points().iter().all(|p| p.fom == 0.0));
        // every point ties at zero: smallest threshold wins
        assert_eq!(result.operating_point().unwrap().threshold, 0.96);
    }

    #[test]
    fn scale_factor_applies_to_signal_only() {
        let mut config = ScanConfig::new(0.0, 1.0, 4);
        config.scale = 0.5;
        let p = run(config).points()[0];
        assert_eq!(p.signal_yield, 4.0);
        assert_eq!(p.background_yield, 6.0);
        assert!((p.fom - 4.0 / 10f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn tie_break_prefers_smallest_threshold() {
        let r = ScanResult::from_unsorted(vec![
            point(0.5, 1.0),
            point(0.1, 2.0),
            point(0.3, 2.0),
        ]);
        assert_eq!(r.operating_point().unwrap().threshold, 0.1);
    }

    fn point(threshold: f64, fom: f64) -> ScanPoint {
        ScanPoint {
            threshold,
            signal_count: 0,
            signal_yield: 0.0,
            background_count: 0,
            background_yield: 0.0,
            fom,
        }
    }

    #[test]
    fn parallel_and_rescan_match_sequential_cumulative() {
        let base = run(ScanConfig::new(-1.0, 1.0, 40));
        let mut rescan = ScanConfig::new(-1.0, 1.0, 40);
        rescan.strategy = ScanStrategy::Rescan;
        let mut parallel = ScanConfig::new(-1.0, 1.0, 40);
        parallel.workers = 3;
        assert_eq!(run(rescan), base);
        assert_eq!(run(parallel), base);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(ScanConfig::new(0.0, 1.0, 0).validate().is_err());
        assert!(ScanConfig::new(1.0, 1.0, 3).validate().is_err());
        assert!(ScanConfig::new(0.0, f64::NAN, 3).validate().is_err());
        let mut neg = ScanConfig::new(0.0, 1.0, 3);
        neg.scale = -1.0;
        assert!(neg.validate().is_err());
        assert!(ScanConfig::new(1e16, 1e16 + 2.0, 1000).validate().is_err());
    }

    #[test]
    fn results_only_after_completion() {
        let mut s = scanner(ScanConfig::new(0.0, 1.0, 4));
        assert!(matches!(s.state(), ScanState::Configured));
        assert!(s.result().is_none());
        let sig = scores(Role::Signal, &SIGNAL);
        let bkg = scores(Role::Background, &BACKGROUND);
        s.run(&sig, &bkg, &CancelToken::new()).unwrap();
        assert!(s.result().is_some());
        assert!(matches!(
            s.run(&sig, &bkg, &CancelToken::new()),
            Err(PipelineError::ScanState { .. })
        ));
    }

    #[test]
    fn cancelled_scan_keeps_partial_result() {
        let mut s = scanner(ScanConfig::new(0.0, 1.0, 4));
        let token = CancelToken::new();
        token.cancel();
        s.run(
            &scores(Role::Signal, &SIGNAL),
            &scores(Role::Background, &BACKGROUND),
            &token,
        )
        .unwrap();
        assert!(s.result().is_none());
        assert!(s.operating_point().is_none());
        assert_eq!(s.partial().map(ScanResult::len), Some(0));
    }

    #[test]
    fn unknown_field_leaves_scanner_configured() {
        let mut s = Scanner::new(
            ScanConfig::new(0.0, 1.0, 4),
            CutTemplate::new(Some("Q2 < 8".parse().unwrap()), "BDT"),
            CutTemplate::new(None, "BDT"),
        )
        .unwrap();
        let err = s
            .run(
                &scores(Role::Signal, &SIGNAL),
                &scores(Role::Background, &BACKGROUND),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::PredicateFieldUnknown { .. }));
        assert!(matches!(s.state(), ScanState::Configured));
    }

    #[test]
    fn overflowing_yields_are_an_error_not_nan() {
        let mut sig = scores(Role::Signal, &[0.5; 10]);
        sig.weight = 1e308;
        let bkg = scores(Role::Background, &BACKGROUND);
        for strategy in [ScanStrategy::Cumulative, ScanStrategy::Rescan] {
            let mut s = scanner(ScanConfig {
                strategy,
                ..ScanConfig::new(0.0, 1.0, 2)
            });
            let err = s.run(&sig, &bkg, &CancelToken::new()).unwrap_err();
            assert!(matches!(err, PipelineError::Config(_)), "{strategy:?}: {err}");
            assert!(matches!(s.state(), ScanState::Configured));
        }
    }
}
