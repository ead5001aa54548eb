//! Per-threshold yield counting.
//!
//! [`RescanCounter`] re-evaluates the full cut for each threshold.
//! [`CumulativeCounter`] evaluates the static part once, sorts the scores
//! that survive it, and answers each threshold with a binary search. Both
//! give identical counts.

use crate::data::filter::{self, CutCount};
use crate::data::model::Dataset;
use crate::error::{PipelineError, Result};
use crate::expr::BoundPredicate;

use super::CutTemplate;

pub trait YieldCounter: Sync {
    fn count(&self, threshold: f64) -> Result<CutCount>;
}

pub struct RescanCounter<'a> {
    dataset: &'a Dataset,
    template: &'a CutTemplate,
}

impl<'a> RescanCounter<'a> {
    /// Fails early if the template references a field missing from `dataset`.
    pub fn new(dataset: &'a Dataset, template: &'a CutTemplate) -> Result<Self> {
        template.at(0.0).bind(dataset.schema())?;
        Ok(RescanCounter { dataset, template })
    }
}

impl YieldCounter for RescanCounter<'_> {
    fn count(&self, threshold: f64) -> Result<CutCount> {
        filter::count(self.dataset, &self.template.at(threshold))
    }
}

pub struct CumulativeCounter {
    /// Scores of records passing the static cuts, ascending, NaN removed.
    sorted: Vec<f64>,
    weight: f64,
}

impl CumulativeCounter {
    pub fn new(dataset: &Dataset, template: &CutTemplate) -> Result<Self> {
        let schema = dataset.schema();
        let score_col = schema.index_of(&template.score_field).ok_or_else(|| {
            PipelineError::PredicateFieldUnknown {
                field: template.score_field.clone(),
            }
        })?;
        let cuts: Option<BoundPredicate> = template
            .cuts
            .as_ref()
            .map(|p| p.bind(schema))
            .transpose()?;

        let mut sorted: Vec<f64> = dataset
            .records()
            .iter()
            .filter(|rec| cuts.as_ref().map_or(true, |c| c.matches(rec)))
            .map(|rec| rec.get(score_col).map_or(f64::NAN, |v| v.as_f64()))
            .filter(|s| !s.is_nan())
            .collect();
        sorted.sort_by(f64::total_cmp);

        Ok(CumulativeCounter {
            sorted,
            weight: dataset.weight,
        })
    }
}

impl YieldCounter for CumulativeCounter {
    fn count(&self, threshold: f64) -> Result<CutCount> {
        let below = self.sorted.partition_point(|s| *s < threshold);
        Ok(CutCount::new(self.sorted.len() - below, self.weight))
    }
}
