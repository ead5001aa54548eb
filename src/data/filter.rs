use serde::Serialize;

use super::model::Dataset;
use crate::error::Result;
use crate::expr::{BoundPredicate, Predicate};

// ---------------------------------------------------------------------------
// Cut evaluation: predicate → matching indices / counts / subset
// ---------------------------------------------------------------------------

/// Matches of a cut on one dataset. `weighted` is `unweighted` scaled by the
/// dataset weight.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CutCount {
    pub unweighted: usize,
    pub weighted: f64,
}

impl CutCount {
    pub fn new(unweighted: usize, weight: f64) -> Self {
        CutCount {
            unweighted,
            weighted: unweighted as f64 * weight,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CutOutcome {
    pub count: CutCount,
    /// Present only when materialization was requested.
    pub subset: Option<Dataset>,
}

/// Return indices of records that pass a bound predicate.
pub fn filtered_indices(dataset: &Dataset, predicate: &BoundPredicate) -> Vec<usize> {
    dataset
        .records()
        .iter()
        .enumerate()
        .filter(|(_, rec)| predicate.matches(rec))
        .map(|(i, _)| i)
        .collect()
}

/// Count records passing `predicate` without materializing them.
///
/// Raw, derived, and score fields can all be referenced as long as they are
/// in the dataset's schema; an unknown field fails the call.
pub fn count(dataset: &Dataset, predicate: &Predicate) -> Result<CutCount> {
    let bound = predicate.bind(dataset.schema())?;
    let n = dataset
        .records()
        .iter()
        .filter(|rec| bound.matches(rec))
        .count();
    Ok(CutCount::new(n, dataset.weight))
}

/// Evaluate `predicate` over `dataset`, optionally keeping the matching
/// records as a new dataset.
pub fn evaluate(dataset: &Dataset, predicate: &Predicate, materialize: bool) -> Result<CutOutcome> {
    if !materialize {
        return Ok(CutOutcome {
            count: count(dataset, predicate)?,
            subset: None,
        });
    }
    let bound = predicate.bind(dataset.schema())?;
    let indices = filtered_indices(dataset, &bound);
    Ok(CutOutcome {
        count: CutCount::new(indices.len(), dataset.weight),
        subset: Some(dataset.subset(&indices)),
    })
}
