use crate::error::{PipelineError, Result};
use crate::panel::Panel;

/// Ordered conditioning panels, serialized comma-joined for the regression
/// engine. Ordering is file-derived panels first, precomputed panels next,
/// and the baseline last; the order does not change the regression but
/// keeps logs and reports reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditioningSet {
    panels: Vec<Panel>,
}

impl ConditioningSet {
    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn to_arg(&self) -> String {
        self.panels
            .iter()
            .map(Panel::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Merge the conditioning sources present in this run. With the baseline
/// disabled at least one other conditioning panel must be supplied.
pub fn compose(
    file_derived: &[Panel],
    precomputed: &[Panel],
    baseline: Option<&Panel>,
) -> Result<ConditioningSet> {
    let mut panels = Vec::with_capacity(file_derived.len() + precomputed.len() + 1);
    panels.extend_from_slice(file_derived);
    panels.extend_from_slice(precomputed);
    if let Some(baseline) = baseline {
        panels.push(baseline.clone());
    }
    if panels.is_empty() {
        return Err(PipelineError::NoConditioningSource);
    }
    Ok(ConditioningSet { panels })
}
