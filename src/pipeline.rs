use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{Result, bail};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::annotate::{AnnotateConfig, build_annotations};
use crate::classify::{classify, classify_group, type_of_file};
use crate::compose::compose;
use crate::exec::{RegressionEngine, ScoringEngine};
use crate::h2::{H2Config, discover_phenotypes, results_file, run_phenotypes, write_params_file};
use crate::logging::RunLog;
use crate::panel::Panel;
use crate::parallel::WorkerBudget;
use crate::report::append_report;
use crate::storage::{Storage, remote_basename};
use crate::types::{
    AnnotationKind, AnnotationSource, CHROMOSOMES, ContinuousBinning, FailurePolicy, StageSummary,
};
use crate::workspace::WorkspaceContext;

/// Fully resolved run configuration. CLI flag interactions (quantiles vs.
/// breakpoints, baseline toggle, list cardinalities) are settled before
/// this value is constructed; the pipeline never inspects raw flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Gene-list files or LD-score folders for the main annotation(s).
    pub main_annotations: Vec<String>,
    /// Output label per main annotation; same cardinality as
    /// `main_annotations`.
    pub ldscores_prefixes: Vec<String>,
    pub summary_stats: Vec<String>,
    /// Remote location for the results and the report.
    pub out: String,
    pub baseline: bool,
    /// Gene lists or LD-score folders to condition on, possibly empty.
    pub conditioning: Vec<String>,
    pub export_ldscore_path: Option<String>,
    pub window_size: u32,
    pub gene_col: String,
    pub snp_list_file: String,
    pub gene_annot_file: String,
    pub plink_folder: String,
    pub weights_folder: String,
    pub freq_folder: Option<String>,
    pub baseline_folder: String,
    pub binning: ContinuousBinning,
    pub policy: FailurePolicy,
    pub cores: Option<usize>,
}

/// Everything a caller needs to judge the run: per-stage outcome
/// summaries and the produced files.
#[derive(Debug)]
pub struct PipelineReport {
    pub annotation_summaries: Vec<StageSummary>,
    pub regression_summary: StageSummary,
    pub results_files: Vec<PathBuf>,
    pub report_file: PathBuf,
}

impl PipelineReport {
    pub fn all_ok(&self) -> bool {
        self.annotation_summaries.iter().all(StageSummary::all_ok)
            && self.regression_summary.all_ok()
    }
}

struct StagedInputs {
    plink_dir: PathBuf,
    weights_dir: PathBuf,
    freq_dir: Option<PathBuf>,
    baseline_dir: Option<PathBuf>,
    snp_list: PathBuf,
    gene_annot: PathBuf,
    /// One staging directory per precomputed conditioning panel, in the
    /// order the panels were supplied.
    cond_panel_dirs: Vec<PathBuf>,
}

/// Run the whole pipeline: classify inputs, stage them, build the main and
/// conditioning LD-score panels, compose the conditioning set, regress
/// each phenotype, and publish the results plus an audit report.
pub fn run(
    config: &PipelineConfig,
    storage: &dyn Storage,
    scorer: &dyn ScoringEngine,
    regression: &dyn RegressionEngine,
    workspace_root: &std::path::Path,
) -> Result<PipelineReport> {
    if config.main_annotations.len() != config.ldscores_prefixes.len() {
        bail!("--main-annot and --ldscores-prefix should be of the same length");
    }

    // Classification happens before any transfer so that configuration
    // errors surface immediately. Main annotations must agree in kind
    // because they pair positionally with the output prefixes;
    // conditioning entries are classified one by one and may mix gene
    // lists with precomputed panels.
    let main_sources = classify_group(storage, &config.main_annotations)?;
    let mut cond_sources = Vec::with_capacity(config.conditioning.len());
    for reference in &config.conditioning {
        cond_sources.push(classify(storage, reference)?);
    }

    let mut ws = WorkspaceContext::create(workspace_root)?;
    let staged = stage_inputs(config, storage, &mut ws, &main_sources, &cond_sources)?;
    let ws = ws;

    let run_label = config.ldscores_prefixes.join("_");
    let mut log = RunLog::create(&ws.path(format!("{run_label}.log")))?;
    log.note(&format!(
        "The main annotation file(s) or LD score(s): {}",
        config.main_annotations.join(":")
    ))?;
    log.note(&format!(
        "The summary statistic(s): {}",
        config.summary_stats.join(":")
    ))?;

    let plink_panel = Panel::from_dir(&staged.plink_dir)?;
    debug!("plink_panel: {plink_panel}");

    // Per-chromosome builds fan out inside one bounded pool; everything
    // after this block consumes completed panels only.
    let cancel = AtomicBool::new(false);
    let budget = WorkerBudget::for_units(config.cores, CHROMOSOMES.count());
    let (summaries, main_entries, file_derived) =
        budget.run("annotation worker pool", || {
            build_all_panels(
                config,
                &ws,
                &staged,
                &main_sources,
                &cond_sources,
                &plink_panel,
                scorer,
                regression,
                &cancel,
            )
        })??;

    let weight_panel = Panel::from_dir(&staged.weights_dir)?;
    debug!("ld_w_panel: {weight_panel}");
    let frequency_panel = staged
        .freq_dir
        .as_deref()
        .map(Panel::from_dir)
        .transpose()?;
    if let Some(panel) = &frequency_panel {
        debug!("tg_f_panel: {panel}");
    }
    let baseline_panel = staged
        .baseline_dir
        .as_deref()
        .map(Panel::from_dir)
        .transpose()?;
    if let Some(panel) = &baseline_panel {
        debug!("ld_ref_panel: {panel}");
    }

    let mut precomputed = Vec::with_capacity(staged.cond_panel_dirs.len());
    for dir in &staged.cond_panel_dirs {
        precomputed.push(Panel::from_dir(dir)?);
    }

    let conditioning = compose(&file_derived, &precomputed, baseline_panel.as_ref())?;
    log.note(&format!(
        "The following panel(s) will be used for conditioning: {}",
        conditioning.to_arg()
    ))?;

    let params_file = ws.path("params.ldcts");
    write_params_file(&params_file, &main_entries)?;

    let runs = discover_phenotypes(&ws.path("ss"), ws.root(), &run_label)?;
    if runs.is_empty() {
        bail!("no summary-statistics files were staged");
    }
    let h2_config = H2Config {
        conditioning: &conditioning,
        params_file: &params_file,
        weight_panel: &weight_panel,
        frequency_panel: frequency_panel.as_ref(),
        policy: config.policy,
    };
    let budget = WorkerBudget::for_units(config.cores, runs.len());
    let regression_summary = budget
        .run("regression worker pool", || {
            run_phenotypes(regression, &runs, &h2_config, &cancel)
        })?
        .into_result(config.policy)?;

    let results_files: Vec<PathBuf> = runs.iter().map(results_file).collect();
    let report_file = ws.path(format!("{run_label}.report"));
    append_report(
        &report_file,
        &config.summary_stats,
        &config.main_annotations,
        &conditioning.to_arg(),
        &results_files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>(),
    )?;

    for path in &results_files {
        if path.exists() {
            storage.publish(path, &config.out)?;
        } else {
            warn!("expected results file {} was not produced", path.display());
        }
    }
    storage.publish(&report_file, &config.out)?;
    if let Some(export) = &config.export_ldscore_path {
        info!("LD scores copied to {export}");
        storage.publish_dir(&ws.path("outld"), export)?;
    }

    log.note("FINITO!")?;

    for summary in summaries.iter().chain(std::iter::once(&regression_summary)) {
        for (unit, err) in summary.failures() {
            log.warn(&format!("{}: {unit} failed: {err}", summary.stage))?;
        }
    }

    Ok(PipelineReport {
        annotation_summaries: summaries,
        regression_summary,
        results_files,
        report_file,
    })
}

/// Build the LD-score panels for every gene-list input (main and
/// conditioning) and resolve each main panel to its params-file entry.
#[allow(clippy::too_many_arguments)]
fn build_all_panels(
    config: &PipelineConfig,
    ws: &WorkspaceContext,
    staged: &StagedInputs,
    main_sources: &[AnnotationSource],
    cond_sources: &[AnnotationSource],
    plink_panel: &Panel,
    scorer: &dyn ScoringEngine,
    regression: &dyn RegressionEngine,
    cancel: &AtomicBool,
) -> Result<(Vec<StageSummary>, Vec<(String, String)>, Vec<Panel>)> {
    let mut summaries = Vec::new();
    let mut main_entries = Vec::new();

    for (source, prefix) in main_sources.iter().zip(&config.ldscores_prefixes) {
        let out_dir = ws.path("outld").join(prefix);
        if source.kind == AnnotationKind::GeneList {
            let gene_list = ws.path(remote_basename(&source.location));
            let (value_type, id_kind) = type_of_file(&gene_list)?;
            let source = source.clone().inspected(value_type, id_kind);
            info!(
                "The type of file that will be used in the analysis: {}",
                source.describe()
            );
            let out_prefix = out_dir.join(prefix);
            let tmp_prefix = ws.path("tmp").join(format!("{prefix}_dscore"));
            let summary = build_annotations(
                scorer,
                regression,
                &source,
                &AnnotateConfig {
                    label: prefix,
                    gene_list: &gene_list,
                    gene_annot: &staged.gene_annot,
                    plink_prefix: plink_panel.as_str(),
                    snp_list: &staged.snp_list,
                    out_prefix: &out_prefix,
                    tmp_prefix: &tmp_prefix,
                    window_size: config.window_size,
                    gene_col: &config.gene_col,
                    binning: &config.binning,
                    policy: config.policy,
                },
                cancel,
            )
            .into_result(config.policy)?;
            summaries.push(summary);
        }
        // Resolve the panel from the directory in both cases; a build that
        // produced nothing surfaces here as an empty panel.
        let panel = Panel::from_dir(&out_dir)?;
        main_entries.push((prefix.clone(), panel.as_str().to_string()));
    }

    let mut file_derived = Vec::new();
    for source in cond_sources {
        if source.kind != AnnotationKind::GeneList {
            continue;
        }
        let name = remote_basename(&source.location);
        let gene_list = ws.path(&name);
        let (value_type, id_kind) = type_of_file(&gene_list)?;
        let source = source.clone().inspected(value_type, id_kind);
        info!(
            "Conditioning gene list {name} will be used as: {}",
            source.describe()
        );
        let cond_dir = ws.path("outcondld").join(&name);
        let out_prefix = cond_dir.join(&name);
        let tmp_prefix = ws.path("tmp").join(format!("{name}_dscore"));
        let summary = build_annotations(
            scorer,
            regression,
            &source,
            &AnnotateConfig {
                label: &name,
                gene_list: &gene_list,
                gene_annot: &staged.gene_annot,
                plink_prefix: plink_panel.as_str(),
                snp_list: &staged.snp_list,
                out_prefix: &out_prefix,
                tmp_prefix: &tmp_prefix,
                window_size: config.window_size,
                gene_col: &config.gene_col,
                binning: &config.binning,
                policy: config.policy,
            },
            cancel,
        )
        .into_result(config.policy)?;
        summaries.push(summary);
        file_derived.push(Panel::from_dir(&cond_dir)?);
    }

    Ok((summaries, main_entries, file_derived))
}

fn stage_inputs(
    config: &PipelineConfig,
    storage: &dyn Storage,
    ws: &mut WorkspaceContext,
    main_sources: &[AnnotationSource],
    cond_sources: &[AnnotationSource],
) -> Result<StagedInputs> {
    info!("Downloading 1000 genomes plink files");
    let plink_dir = ws.ensure_dir(remote_basename(&config.plink_folder))?;
    storage.fetch_dir(&config.plink_folder, &plink_dir)?;

    info!("Downloading 1000 genomes weights for LD-score regression");
    let weights_dir =
        ws.ensure_dir(PathBuf::from("inld").join(remote_basename(&config.weights_folder)))?;
    storage.fetch_dir(&config.weights_folder, &weights_dir)?;

    let freq_dir = match &config.freq_folder {
        Some(folder) => {
            info!("Downloading 1000 genomes frequencies");
            let dir = ws.ensure_dir(remote_basename(folder))?;
            storage.fetch_dir(folder, &dir)?;
            Some(dir)
        }
        None => None,
    };

    let baseline_dir = if config.baseline {
        info!("Downloading baseline annotation");
        let dir =
            ws.ensure_dir(PathBuf::from("inld").join(remote_basename(&config.baseline_folder)))?;
        storage.fetch_dir(&config.baseline_folder, &dir)?;
        Some(dir)
    } else {
        None
    };

    for (source, prefix) in main_sources.iter().zip(&config.ldscores_prefixes) {
        let out_dir = ws.ensure_dir(PathBuf::from("outld").join(prefix))?;
        match source.kind {
            AnnotationKind::GeneList => {
                info!("Downloading main annotation file: {}", source.location);
                let local = ws.path(remote_basename(&source.location));
                storage.fetch(&source.location, &local)?;
            }
            AnnotationKind::ScorePanel => {
                info!("Downloading main annotation LD scores: {}", source.location);
                storage.fetch_dir(&source.location, &out_dir)?;
            }
        }
    }

    let mut cond_panel_dirs = Vec::new();
    for source in cond_sources {
        match source.kind {
            AnnotationKind::GeneList => {
                info!(
                    "Downloading conditioning annotation file: {}",
                    source.location
                );
                let name = remote_basename(&source.location);
                let local = ws.path(&name);
                storage.fetch(&source.location, &local)?;
                ws.ensure_dir(PathBuf::from("outcondld").join(&name))?;
            }
            AnnotationKind::ScorePanel => {
                info!(
                    "Downloading conditioning LD-score panel: {}",
                    source.location
                );
                // Each precomputed panel stays in its own staging directory
                // so prefix resolution never mixes panels.
                let dir = ws
                    .ensure_dir(PathBuf::from("cond_ldscores").join(random_string(7)))?;
                storage.fetch_dir(&source.location, &dir)?;
                cond_panel_dirs.push(dir);
            }
        }
    }

    info!("Downloading SNP list for LD-score generation");
    let snp_list = ws.path(remote_basename(&config.snp_list_file));
    storage.fetch(&config.snp_list_file, &snp_list)?;

    info!("Downloading gene-position annotation file");
    let gene_annot = ws.path(remote_basename(&config.gene_annot_file));
    storage.fetch(&config.gene_annot_file, &gene_annot)?;

    info!(
        "Downloading summary statistic(s): {}",
        config.summary_stats.join(":")
    );
    let ss_dir = ws.path("ss");
    for reference in &config.summary_stats {
        storage.fetch(reference, &ss_dir.join(remote_basename(reference)))?;
    }

    Ok(StagedInputs {
        plink_dir,
        weights_dir,
        freq_dir,
        baseline_dir,
        snp_list,
        gene_annot,
        cond_panel_dirs,
    })
}

fn random_string(length: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}
