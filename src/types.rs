use std::ops::RangeInclusive;
use std::path::PathBuf;

use crate::error::{PipelineError, Result};

/// Autosomes covered by every annotation build and score panel.
pub const CHROMOSOMES: RangeInclusive<u8> = 1..=22;

/// Suffix stripped from a summary-statistics filename to derive the
/// phenotype name.
pub const SUMSTATS_SUFFIX: &str = ".sumstats.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    GeneList,
    ScorePanel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Binary,
    Continuous,
    Unknown,
}

/// Whether the rows of a gene list name genes or SNP identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    GeneName,
    SnpId,
}

/// A user-supplied annotation reference, classified exactly once at
/// pipeline start and never re-derived afterwards.
#[derive(Debug, Clone)]
pub struct AnnotationSource {
    pub location: String,
    pub kind: AnnotationKind,
    pub value_type: ValueType,
    pub id_kind: IdKind,
}

impl AnnotationSource {
    /// Attach the result of inspecting the staged file contents.
    pub fn inspected(mut self, value_type: ValueType, id_kind: IdKind) -> Self {
        self.value_type = value_type;
        self.id_kind = id_kind;
        self
    }

    pub fn describe(&self) -> String {
        let value = match self.value_type {
            ValueType::Binary => "binary",
            ValueType::Continuous => "continuous",
            ValueType::Unknown => "unclassified",
        };
        let ids = match self.id_kind {
            IdKind::GeneName => "gene list",
            IdKind::SnpId => "rsids",
        };
        format!("{value} {ids}")
    }
}

/// How a continuous annotation is split into regression categories.
/// Explicit breakpoints and a quantile count are mutually exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum ContinuousBinning {
    Quantiles(usize),
    Breaks(Vec<f64>),
}

impl ContinuousBinning {
    /// Resolve the CLI flag pair once; supplying breakpoints unsets the
    /// default quantile count.
    pub fn from_flags(quantiles: usize, cont_breaks: Option<&str>) -> Result<Self> {
        if let Some(raw) = cont_breaks {
            let mut breaks = Vec::new();
            for token in raw.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                let value = token.parse::<f64>().map_err(|_| {
                    PipelineError::InvalidArgument(format!("invalid --cont-breaks value: {token}"))
                })?;
                breaks.push(value);
            }
            if breaks.is_empty() {
                return Err(PipelineError::InvalidArgument(
                    "--cont-breaks supplied without any boundary".to_string(),
                ));
            }
            return Ok(ContinuousBinning::Breaks(breaks));
        }
        if quantiles == 0 {
            return Err(PipelineError::InvalidArgument(
                "--quantiles must be at least 1".to_string(),
            ));
        }
        Ok(ContinuousBinning::Quantiles(quantiles))
    }
}

/// What to do when one chromosome or phenotype unit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort remaining sibling units and fail the stage.
    FailFast,
    /// Finish the siblings and aggregate the failures into the run summary.
    BestEffort,
}

/// One (summary-statistics file, output prefix) pair, consumed exactly once
/// by the heritability runner.
#[derive(Debug, Clone)]
pub struct PhenotypeRun {
    pub phenotype_name: String,
    pub input_path: PathBuf,
    pub output_prefix: PathBuf,
}

/// Outcome of one independent unit of external work (a chromosome build or
/// a phenotype regression).
#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: String,
    pub result: Result<()>,
}

/// Per-stage collection of unit outcomes. Nothing is discarded: a failing
/// chromosome shows up here instead of silently leaving a gap in the score
/// set.
#[derive(Debug)]
pub struct StageSummary {
    pub stage: String,
    pub outcomes: Vec<UnitOutcome>,
}

impl StageSummary {
    pub fn new(stage: impl Into<String>, outcomes: Vec<UnitOutcome>) -> Self {
        StageSummary {
            stage: stage.into(),
            outcomes,
        }
    }

    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &PipelineError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.unit.as_str(), e)))
    }

    /// Collapse to an error under fail-fast; best-effort callers keep the
    /// summary and aggregate at the end of the run. Cancelled units are
    /// skips, not root causes, and never selected as the stage error.
    pub fn into_result(self, policy: FailurePolicy) -> Result<StageSummary> {
        if policy == FailurePolicy::FailFast {
            let mut kept = Vec::with_capacity(self.outcomes.len());
            for outcome in self.outcomes {
                match outcome.result {
                    Err(err) if !matches!(err, PipelineError::Cancelled { .. }) => {
                        return Err(err);
                    }
                    _ => kept.push(outcome),
                }
            }
            return Ok(StageSummary {
                stage: self.stage,
                outcomes: kept,
            });
        }
        Ok(self)
    }
}
