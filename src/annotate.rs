use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::exec::{AnnotRequest, LdScoreMode, LdScoreRequest, RegressionEngine, ScoringEngine};
use crate::types::{
    AnnotationSource, CHROMOSOMES, ContinuousBinning, FailurePolicy, StageSummary, UnitOutcome,
    ValueType,
};

/// Shared inputs for one gene-list annotation build.
pub struct AnnotateConfig<'a> {
    pub label: &'a str,
    pub gene_list: &'a Path,
    pub gene_annot: &'a Path,
    pub plink_prefix: &'a str,
    pub snp_list: &'a Path,
    /// Per-source output prefix; chromosome files land at
    /// `{out_prefix}.{chrom}.l2.ldscore.gz`.
    pub out_prefix: &'a Path,
    /// Per-source scratch prefix for intermediate annotation files.
    pub tmp_prefix: &'a Path,
    pub window_size: u32,
    pub gene_col: &'a str,
    pub binning: &'a ContinuousBinning,
    pub policy: FailurePolicy,
}

/// Build the 22 per-chromosome thin LD-score files for one classified
/// gene-list source. Chromosome units are independent, share no mutable
/// state, and run in the current rayon pool; the shared cancel flag lets a
/// fail-fast failure stop siblings that have not started yet.
pub fn build_annotations(
    scorer: &dyn ScoringEngine,
    regression: &dyn RegressionEngine,
    source: &AnnotationSource,
    config: &AnnotateConfig<'_>,
    cancel: &AtomicBool,
) -> StageSummary {
    info!(
        "Creating LD scores for {} ({})",
        config.gene_list.display(),
        source.describe()
    );
    let outcomes: Vec<UnitOutcome> = CHROMOSOMES
        .into_par_iter()
        .map(|chrom| UnitOutcome {
            unit: format!("{} chr{chrom}", config.label),
            result: build_chromosome(scorer, regression, source, config, cancel, chrom),
        })
        .collect();
    StageSummary::new(format!("annotation build {}", config.label), outcomes)
}

fn build_chromosome(
    scorer: &dyn ScoringEngine,
    regression: &dyn RegressionEngine,
    source: &AnnotationSource,
    config: &AnnotateConfig<'_>,
    cancel: &AtomicBool,
    chrom: u8,
) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        return Err(PipelineError::Cancelled {
            unit: format!("{} chr{chrom}", config.label),
        });
    }
    let result = run_chromosome(scorer, regression, source, config, chrom);
    if result.is_err() && config.policy == FailurePolicy::FailFast {
        cancel.store(true, Ordering::SeqCst);
    }
    result
}

fn run_chromosome(
    scorer: &dyn ScoringEngine,
    regression: &dyn RegressionEngine,
    source: &AnnotationSource,
    config: &AnnotateConfig<'_>,
    chrom: u8,
) -> Result<()> {
    debug!(
        "Running the gene-set scorer for chr {chrom} and gene-set file {}",
        config.gene_list.display()
    );
    scorer.build_annotation(&AnnotRequest {
        gene_list: config.gene_list.to_path_buf(),
        gene_annot: config.gene_annot.to_path_buf(),
        plink_prefix: config.plink_prefix.to_string(),
        ldscores_prefix: config.tmp_prefix.to_path_buf(),
        window_size: config.window_size,
        gene_col: config.gene_col.to_string(),
        id_kind: source.id_kind,
        chromosome: chrom,
    })?;

    debug!("Running the LD-score engine for chr {chrom}");
    let mode = ld_score_mode(source.value_type, config, chrom)?;
    let out_prefix = chrom_prefix(config.out_prefix, chrom);
    regression.ld_scores(&LdScoreRequest {
        plink_prefix: config.plink_prefix.to_string(),
        chromosome: chrom,
        mode,
        out_prefix: out_prefix.clone(),
    })?;

    // A missing chromosome file must not stay a silent gap in the score
    // set.
    let expected = PathBuf::from(format!("{}.l2.ldscore.gz", out_prefix.display()));
    if !expected.exists() {
        return Err(PipelineError::MissingOutput {
            unit: format!("{} chr{chrom}", config.label),
            path: expected,
        });
    }
    Ok(())
}

fn ld_score_mode(
    value_type: ValueType,
    config: &AnnotateConfig<'_>,
    chrom: u8,
) -> Result<LdScoreMode> {
    match value_type {
        ValueType::Binary => Ok(LdScoreMode::Thin {
            annot: scratch_file(config.tmp_prefix, chrom, "annot.gz"),
            snp_list: config.snp_list.to_path_buf(),
        }),
        ValueType::Continuous => match config.binning {
            ContinuousBinning::Quantiles(quantiles) => Ok(LdScoreMode::Quantiles {
                cont_bin: scratch_file(config.tmp_prefix, chrom, "cont_bin.gz"),
                quantiles: *quantiles,
            }),
            ContinuousBinning::Breaks(breaks) => Ok(LdScoreMode::Breaks {
                cont_bin: scratch_file(config.tmp_prefix, chrom, "cont_bin.gz"),
                breaks: breaks.clone(),
            }),
        },
        ValueType::Unknown => Err(PipelineError::InvalidArgument(format!(
            "{} was never inspected for binary/continuous values",
            config.label
        ))),
    }
}

fn chrom_prefix(prefix: &Path, chrom: u8) -> PathBuf {
    PathBuf::from(format!("{}.{chrom}", prefix.display()))
}

fn scratch_file(tmp_prefix: &Path, chrom: u8, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{chrom}.{suffix}", tmp_prefix.display()))
}
