use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::compose::ConditioningSet;
use crate::error::{PipelineError, Result};
use crate::exec::{H2Request, RegressionEngine};
use crate::panel::Panel;
use crate::types::{FailurePolicy, PhenotypeRun, SUMSTATS_SUFFIX, StageSummary, UnitOutcome};

/// Shared inputs for the per-phenotype regression loop.
pub struct H2Config<'a> {
    pub conditioning: &'a ConditioningSet,
    pub params_file: &'a Path,
    pub weight_panel: &'a Panel,
    pub frequency_panel: Option<&'a Panel>,
    pub policy: FailurePolicy,
}

/// Stratification parameter file consumed by the regression engine: one
/// line per main panel, label and resolved prefix tab-separated.
pub fn write_params_file(path: &Path, entries: &[(String, String)]) -> Result<()> {
    let mut file = File::create(path)?;
    for (label, prefix) in entries {
        debug!("Saving parameter file entry: {label} -> {prefix}");
        writeln!(file, "{label}\t{prefix}")?;
    }
    Ok(())
}

/// Derive one run per staged summary-statistics file. The phenotype name
/// is the filename with the `.sumstats.gz` suffix stripped.
pub fn discover_phenotypes(
    ss_dir: &Path,
    out_dir: &Path,
    run_label: &str,
) -> Result<Vec<PhenotypeRun>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(ss_dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut runs = Vec::with_capacity(files.len());
    for input_path in files {
        let name = input_path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                PipelineError::InvalidArgument(format!(
                    "unreadable summary-statistics filename: {}",
                    input_path.display()
                ))
            })?;
        let phenotype_name = name.strip_suffix(SUMSTATS_SUFFIX).unwrap_or(name).to_string();
        let output_prefix = out_dir.join(format!("{phenotype_name}.{run_label}.ldsc"));
        runs.push(PhenotypeRun {
            phenotype_name,
            input_path,
            output_prefix,
        });
    }
    Ok(runs)
}

/// Expected results file for one run, derived from its output prefix.
pub fn results_file(run: &PhenotypeRun) -> PathBuf {
    PathBuf::from(format!(
        "{}.cell_type_results.txt",
        run.output_prefix.display()
    ))
}

/// Invoke the regression engine once per phenotype. Iterations are
/// independent and run in the current rayon pool; the append-only report
/// is written by the caller after the barrier.
pub fn run_phenotypes(
    engine: &dyn RegressionEngine,
    runs: &[PhenotypeRun],
    config: &H2Config<'_>,
    cancel: &AtomicBool,
) -> StageSummary {
    let outcomes: Vec<UnitOutcome> = runs
        .par_iter()
        .map(|run| UnitOutcome {
            unit: run.phenotype_name.clone(),
            result: run_one(engine, run, config, cancel),
        })
        .collect();
    StageSummary::new("partitioned heritability", outcomes)
}

fn run_one(
    engine: &dyn RegressionEngine,
    run: &PhenotypeRun,
    config: &H2Config<'_>,
    cancel: &AtomicBool,
) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        return Err(PipelineError::Cancelled {
            unit: run.phenotype_name.clone(),
        });
    }
    info!(
        "Running partitioned LD-score regression for {}",
        run.phenotype_name
    );
    let result = engine.partitioned_h2(&H2Request {
        sumstats: run.input_path.clone(),
        conditioning_panel: config.conditioning.to_arg(),
        params_file: config.params_file.to_path_buf(),
        weight_panel: config.weight_panel.as_str().to_string(),
        frequency_panel: config.frequency_panel.map(|p| p.as_str().to_string()),
        out_prefix: run.output_prefix.clone(),
    });
    if result.is_err() && config.policy == FailurePolicy::FailFast {
        cancel.store(true, Ordering::SeqCst);
    }
    result
}
