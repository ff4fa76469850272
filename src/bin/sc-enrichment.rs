use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{error, info};

use sc_enrichment::exec::{GenesetScorer, LdscExecutable};
use sc_enrichment::logging::init_tracing;
use sc_enrichment::pipeline::{self, PipelineConfig};
use sc_enrichment::storage::GsutilStorage;
use sc_enrichment::types::{ContinuousBinning, FailurePolicy};

#[derive(Parser)]
#[command(name = "sc-enrichment")]
#[command(about = "Partitioned-heritability enrichment from gene sets or LD scores", long_about = None)]
struct Cli {
    /// Gene-list file(s) to score, or folder(s) of precomputed LD scores.
    #[arg(long, required = true, value_delimiter = ',')]
    main_annot: Vec<String>,

    /// Munged summary statistics file(s) ending in .sumstats.gz.
    #[arg(long, required = true, value_delimiter = ',')]
    summary_stats_files: Vec<String>,

    /// Output label(s), one per --main-annot entry.
    #[arg(long, required = true, value_delimiter = ',')]
    ldscores_prefix: Vec<String>,

    /// Location where results and the report are published.
    #[arg(long, required = true)]
    out: String,

    /// Do not condition on the baseline annotations.
    #[arg(long)]
    no_baseline: bool,

    /// Gene list(s) and/or LD-score folder(s) to condition on; the two
    /// kinds may be mixed in one list.
    #[arg(long, value_delimiter = ',')]
    condition_annot: Vec<String>,

    /// Publish the generated LD scores to this location as well.
    #[arg(long)]
    export_ldscore_path: Option<String>,

    /// Size of the window around each gene, in base pairs.
    #[arg(long, default_value_t = 100_000)]
    windowsize: u32,

    /// List of SNPs kept when generating LD scores.
    #[arg(long, default_value = "gs://singlecellldscore/list.txt")]
    snp_list_file: String,

    /// Start and end position for each gene.
    #[arg(long, default_value = "gs://singlecellldscore/GENENAME_gene_annot.txt")]
    gene_anno_pos_file: String,

    /// Gene column name in the file given by --gene-anno-pos-file.
    #[arg(long, default_value = "GENENAME")]
    gene_col_name: String,

    /// Per-chromosome 1000 genomes weights for the regression.
    #[arg(long, default_value = "gs://singlecellldscore/1000G_Phase3_weights_hm3_no_MHC")]
    tkg_weights_folder: String,

    /// Per-chromosome 1000 genomes plink files for LD-score generation.
    #[arg(long, default_value = "gs://singlecellldscore/plink_files")]
    tkg_plink_folder: String,

    /// Per-chromosome 1000 genomes allele frequencies.
    #[arg(long, default_value = "gs://singlecellldscore/1000G_Phase3_frq")]
    tkg_freq_folder: String,

    /// Baseline per-chromosome LD scores used for conditioning.
    #[arg(long, default_value = "gs://singlecellldscore/baselineLD_v1.1")]
    baseline_ldscores_folder: String,

    /// Number of quantiles a continuous annotation is split into.
    #[arg(long, default_value_t = 5)]
    quantiles: usize,

    /// Explicit boundary points for a continuous annotation, comma
    /// separated, e.g. 0.1,0.4,0.5. Overrides --quantiles.
    #[arg(long)]
    cont_breaks: Option<String>,

    /// Increase output verbosity.
    #[arg(long)]
    verbose: bool,

    /// What to do when one chromosome or phenotype fails.
    #[arg(long, value_enum, default_value_t = OnFailure::FailFast)]
    on_failure: OnFailure,

    /// Worker threads for per-chromosome and per-phenotype fan-out.
    #[arg(long)]
    cores: Option<usize>,

    /// Kill any external engine invocation running longer than this many
    /// seconds.
    #[arg(long)]
    engine_timeout: Option<u64>,

    /// Program invoked to turn a gene set into a per-chromosome annotation.
    #[arg(long, default_value = "genesets_to_ldscores.py")]
    scoring_engine: PathBuf,

    /// LDSC program used for score generation and heritability regression.
    #[arg(long, default_value = "ldsc.py")]
    ldsc_engine: PathBuf,

    /// Local working directory for staged inputs and outputs.
    #[arg(long, default_value = "/mnt/data")]
    workdir: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnFailure {
    FailFast,
    BestEffort,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("run finished with failed units, see the log above");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let binning = ContinuousBinning::from_flags(cli.quantiles, cli.cont_breaks.as_deref())?;
    let policy = match cli.on_failure {
        OnFailure::FailFast => FailurePolicy::FailFast,
        OnFailure::BestEffort => FailurePolicy::BestEffort,
    };
    let deadline = cli.engine_timeout.map(Duration::from_secs);

    let config = PipelineConfig {
        main_annotations: cli.main_annot,
        ldscores_prefixes: cli.ldscores_prefix,
        summary_stats: cli.summary_stats_files,
        out: cli.out,
        baseline: !cli.no_baseline,
        conditioning: cli.condition_annot,
        export_ldscore_path: cli.export_ldscore_path,
        window_size: cli.windowsize,
        gene_col: cli.gene_col_name,
        snp_list_file: cli.snp_list_file,
        gene_annot_file: cli.gene_anno_pos_file,
        plink_folder: cli.tkg_plink_folder,
        weights_folder: cli.tkg_weights_folder,
        freq_folder: Some(cli.tkg_freq_folder),
        baseline_folder: cli.baseline_ldscores_folder,
        binning,
        policy,
        cores: cli.cores,
    };

    let storage = GsutilStorage;
    let scorer = GenesetScorer {
        program: cli.scoring_engine,
        deadline,
    };
    let ldsc = LdscExecutable {
        program: cli.ldsc_engine,
        deadline,
    };

    let report = pipeline::run(&config, &storage, &scorer, &ldsc, &cli.workdir)?;
    info!(
        "results written for {} phenotype(s)",
        report.results_files.len()
    );
    Ok(report.all_ok())
}
