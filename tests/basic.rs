use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::process::Command;
use std::time::{Duration, Instant};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::tempdir;

use sc_enrichment::classify::{classify, classify_group, type_of_file};
use sc_enrichment::compose::compose;
use sc_enrichment::error::PipelineError;
use sc_enrichment::exec::{AnnotRequest, GenesetScorer, ScoringEngine, run_with_deadline};
use sc_enrichment::h2::{discover_phenotypes, results_file, write_params_file};
use sc_enrichment::panel::{Panel, common_prefix};
use sc_enrichment::parallel::WorkerBudget;
use sc_enrichment::report::append_report;
use sc_enrichment::storage::{LocalStorage, remote_basename, with_retry};
use sc_enrichment::types::{
    AnnotationKind, ContinuousBinning, FailurePolicy, IdKind, StageSummary, UnitOutcome, ValueType,
};
use sc_enrichment::workspace::WorkspaceContext;

#[test]
fn common_prefix_of_chromosome_files() {
    let paths = vec![
        "out/panel.1.l2.ldscore.gz".to_string(),
        "out/panel.2.l2.ldscore.gz".to_string(),
        "out/panel.10.l2.ldscore.gz".to_string(),
        "out/panel.22.l2.ldscore.gz".to_string(),
    ];
    assert_eq!(common_prefix(&paths), "out/panel.");
}

#[test]
fn common_prefix_degenerate_inputs() {
    assert_eq!(common_prefix(&[]), "");
    let single = vec!["out/panel.1.l2.ldscore.gz".to_string()];
    assert_eq!(common_prefix(&single), "out/panel.1.l2.ldscore.gz");
    let disjoint = vec!["alpha".to_string(), "beta".to_string()];
    assert_eq!(common_prefix(&disjoint), "");
}

#[test]
fn panel_from_dir_resolves_prefix() {
    let dir = tempdir().expect("tempdir");
    for chrom in [1u8, 2, 10, 22] {
        fs::write(dir.path().join(format!("scores.{chrom}.l2.ldscore.gz")), b"x")
            .expect("write score file");
    }
    let panel = Panel::from_dir(dir.path()).expect("resolve panel");
    assert!(panel.as_str().ends_with("/scores."));
}

#[test]
fn panel_from_dir_rejects_empty_dir() {
    let dir = tempdir().expect("tempdir");
    let err = Panel::from_dir(dir.path()).expect_err("empty dir must not resolve");
    assert!(matches!(err, PipelineError::EmptyPanel(_)));
}

#[test]
fn conditioning_order_puts_baseline_last() {
    let file_derived = vec![Panel::new("cond/genes.")];
    let precomputed = vec![Panel::new("cond_ldscores/abc/panel.")];
    let baseline = Panel::new("inld/baseline.");
    let set = compose(&file_derived, &precomputed, Some(&baseline)).expect("compose");
    assert_eq!(
        set.to_arg(),
        "cond/genes.,cond_ldscores/abc/panel.,inld/baseline."
    );
}

#[test]
fn conditioning_requires_at_least_one_source() {
    let err = compose(&[], &[], None).expect_err("no sources");
    assert!(matches!(err, PipelineError::NoConditioningSource));
}

#[test]
fn breaks_override_quantile_default() {
    let binning = ContinuousBinning::from_flags(5, Some("0.1,0.4,0.5")).expect("breaks");
    assert_eq!(binning, ContinuousBinning::Breaks(vec![0.1, 0.4, 0.5]));
    let binning = ContinuousBinning::from_flags(5, None).expect("quantiles");
    assert_eq!(binning, ContinuousBinning::Quantiles(5));
}

#[test]
fn breaks_accept_leading_space_and_negatives() {
    let binning = ContinuousBinning::from_flags(5, Some(" -0.1,-0.4,0.5")).expect("breaks");
    assert_eq!(binning, ContinuousBinning::Breaks(vec![-0.1, -0.4, 0.5]));
}

#[test]
fn invalid_binning_flags_are_rejected() {
    ContinuousBinning::from_flags(0, None).expect_err("zero quantiles");
    ContinuousBinning::from_flags(5, Some("a,b")).expect_err("non-numeric breaks");
}

#[test]
fn type_of_file_single_column_gene_names() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("genes.txt");
    fs::write(&path, "BRCA1\nTP53\n").expect("write gene list");
    let (value_type, id_kind) = type_of_file(&path).expect("inspect");
    assert_eq!(value_type, ValueType::Binary);
    assert_eq!(id_kind, IdKind::GeneName);
}

#[test]
fn type_of_file_two_columns_is_continuous() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scores.txt");
    fs::write(&path, "BRCA1\t0.73\nTP53\t0.12\n").expect("write score file");
    let (value_type, id_kind) = type_of_file(&path).expect("inspect");
    assert_eq!(value_type, ValueType::Continuous);
    assert_eq!(id_kind, IdKind::GeneName);
}

#[test]
fn type_of_file_recognizes_rsids() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("snps.txt");
    fs::write(&path, "rs12345\nrs67890\n").expect("write snp list");
    let (value_type, id_kind) = type_of_file(&path).expect("inspect");
    assert_eq!(value_type, ValueType::Binary);
    assert_eq!(id_kind, IdKind::SnpId);
}

#[test]
fn type_of_file_reads_gzip() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scores.txt.gz");
    let file = fs::File::create(&path).expect("create gz");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(b"rs12345\t0.5\nrs67890\t0.9\n")
        .expect("write gz");
    encoder.finish().expect("finish gz");
    let (value_type, id_kind) = type_of_file(&path).expect("inspect");
    assert_eq!(value_type, ValueType::Continuous);
    assert_eq!(id_kind, IdKind::SnpId);
}

#[test]
fn classify_file_vs_panel() {
    let dir = tempdir().expect("tempdir");
    let gene_list = dir.path().join("genes.txt");
    fs::write(&gene_list, "BRCA1\n").expect("write gene list");
    let panel_dir = dir.path().join("scores");
    fs::create_dir(&panel_dir).expect("mkdir");
    for chrom in 1u8..=3 {
        fs::write(panel_dir.join(format!("p.{chrom}.l2.ldscore.gz")), b"x")
            .expect("write score file");
    }

    let storage = LocalStorage;
    let file = classify(&storage, gene_list.to_str().expect("utf8")).expect("classify file");
    assert_eq!(file.kind, AnnotationKind::GeneList);
    let panel = classify(&storage, panel_dir.to_str().expect("utf8")).expect("classify panel");
    assert_eq!(panel.kind, AnnotationKind::ScorePanel);

    classify(&storage, dir.path().join("missing.txt").to_str().expect("utf8"))
        .expect_err("missing location");
}

#[test]
fn mixed_group_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let gene_list = dir.path().join("genes.txt");
    fs::write(&gene_list, "BRCA1\n").expect("write gene list");
    let panel_dir = dir.path().join("scores");
    fs::create_dir(&panel_dir).expect("mkdir");
    fs::write(panel_dir.join("p.1.l2.ldscore.gz"), b"x").expect("write");
    fs::write(panel_dir.join("p.2.l2.ldscore.gz"), b"x").expect("write");

    let storage = LocalStorage;
    let group = vec![
        gene_list.to_string_lossy().into_owned(),
        panel_dir.to_string_lossy().into_owned(),
    ];
    let err = classify_group(&storage, &group).expect_err("mixed group");
    assert!(err.to_string().contains("same type"));
}

#[test]
fn params_file_has_one_tab_separated_line_per_panel() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("params.ldcts");
    let entries = vec![
        ("geneA".to_string(), "outld/geneA/geneA.".to_string()),
        ("geneB".to_string(), "outld/geneB/geneB.".to_string()),
    ];
    write_params_file(&path, &entries).expect("write params");
    let content = fs::read_to_string(&path).expect("read params");
    assert_eq!(
        content,
        "geneA\toutld/geneA/geneA.\ngeneB\toutld/geneB/geneB.\n"
    );
}

#[test]
fn phenotypes_discovered_from_sumstats_names() {
    let dir = tempdir().expect("tempdir");
    let ss = dir.path().join("ss");
    fs::create_dir(&ss).expect("mkdir");
    fs::write(ss.join("height.sumstats.gz"), b"x").expect("write");
    fs::write(ss.join("bmi.sumstats.gz"), b"x").expect("write");

    let runs = discover_phenotypes(&ss, dir.path(), "geneA").expect("discover");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].phenotype_name, "bmi");
    assert_eq!(runs[1].phenotype_name, "height");
    assert!(runs[0].output_prefix.ends_with("bmi.geneA.ldsc"));
    assert!(
        results_file(&runs[1])
            .to_string_lossy()
            .ends_with("height.geneA.ldsc.cell_type_results.txt")
    );
}

#[test]
fn report_appends_one_block_per_run() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("run.report");
    let ss = vec!["gs://bucket/height.sumstats.gz".to_string()];
    let mains = vec!["gs://bucket/genes.txt".to_string()];
    let outs = vec!["height.geneA.ldsc.cell_type_results.txt".to_string()];

    append_report(&path, &ss, &mains, "inld/baseline.", &outs).expect("first append");
    let first = fs::read_to_string(&path).expect("read report");
    assert_eq!(first.lines().count(), 4);
    assert!(first.starts_with("Summary statistic(s) used: gs://bucket/height.sumstats.gz"));
    assert!(first.contains("Conditional panel(s) used: inld/baseline."));

    append_report(&path, &ss, &mains, "inld/baseline.", &outs).expect("second append");
    let second = fs::read_to_string(&path).expect("read report");
    assert_eq!(second, format!("{first}{first}"));
}

#[test]
fn workspace_creates_base_layout() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("work");
    let ws = WorkspaceContext::create(&root).expect("create workspace");
    for sub in ["ss", "outld", "inld", "outcondld", "cond_ldscores", "tmp"] {
        assert!(ws.path(sub).is_dir(), "{sub} missing");
    }
    assert_eq!(ws.created_dirs().count(), 6);
}

#[test]
fn worker_count_capped_at_unit_count() {
    assert_eq!(WorkerBudget::for_units(None, 22).workers(), None);
    assert_eq!(WorkerBudget::for_units(Some(8), 22).workers(), Some(8));
    assert_eq!(WorkerBudget::for_units(Some(64), 22).workers(), Some(22));
    assert_eq!(WorkerBudget::for_units(Some(4), 0).workers(), Some(1));
}

#[test]
fn fail_fast_skips_cancelled_units_as_root_cause() {
    let summary = StageSummary::new(
        "stage",
        vec![
            UnitOutcome {
                unit: "chr1".to_string(),
                result: Err(PipelineError::Cancelled {
                    unit: "chr1".to_string(),
                }),
            },
            UnitOutcome {
                unit: "chr2".to_string(),
                result: Err(PipelineError::InvalidArgument("boom".to_string())),
            },
        ],
    );
    let err = summary
        .into_result(FailurePolicy::FailFast)
        .expect_err("fail fast");
    assert!(matches!(err, PipelineError::InvalidArgument(_)));

    let summary = StageSummary::new(
        "stage",
        vec![UnitOutcome {
            unit: "chr1".to_string(),
            result: Err(PipelineError::InvalidArgument("boom".to_string())),
        }],
    );
    let kept = summary
        .into_result(FailurePolicy::BestEffort)
        .expect("best effort keeps summary");
    assert!(!kept.all_ok());
}

#[test]
fn deadline_kills_slow_engine_command() {
    let mut cmd = Command::new("sleep");
    cmd.arg("5");
    let started = Instant::now();
    let err = run_with_deadline(cmd, "slow engine", Some(Duration::from_millis(300)))
        .expect_err("deadline must fire");
    assert!(started.elapsed() < Duration::from_secs(4), "child was not killed");
    match err {
        PipelineError::Timeout { unit, seconds } => {
            assert_eq!(unit, "slow engine");
            assert_eq!(seconds, 0);
        }
        other => panic!("expected a timeout, got {other}"),
    }
}

#[test]
fn nonzero_engine_exit_carries_stderr() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "echo boom >&2; exit 3"]);
    let err = run_with_deadline(cmd, "failing engine", None).expect_err("non-zero exit");
    match err {
        PipelineError::Engine { unit, stderr, .. } => {
            assert_eq!(unit, "failing engine");
            assert_eq!(stderr, "boom");
        }
        other => panic!("expected an engine failure, got {other}"),
    }
}

#[test]
fn scoring_engine_deadline_surfaces_as_timeout() {
    let dir = tempdir().expect("tempdir");
    let program = dir.path().join("slow-scorer.sh");
    fs::write(&program, "#!/bin/sh\nsleep 5\n").expect("write script");
    let mut perms = fs::metadata(&program).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&program, perms).expect("chmod script");

    let scorer = GenesetScorer {
        program,
        deadline: Some(Duration::from_millis(300)),
    };
    let err = scorer
        .build_annotation(&AnnotRequest {
            gene_list: dir.path().join("genes.txt"),
            gene_annot: dir.path().join("gene_annot.txt"),
            plink_prefix: "plink.".to_string(),
            ldscores_prefix: dir.path().join("tmp_dscore"),
            window_size: 100_000,
            gene_col: "GENENAME".to_string(),
            id_kind: IdKind::GeneName,
            chromosome: 1,
        })
        .expect_err("deadline must fire");
    assert!(matches!(err, PipelineError::Timeout { .. }));
}

#[test]
fn transfers_retry_until_success() {
    let mut attempts = 0;
    let value = with_retry("flaky transfer", || {
        attempts += 1;
        if attempts < 3 {
            Err(anyhow::anyhow!("transient failure"))
        } else {
            Ok(attempts)
        }
    })
    .expect("third attempt succeeds");
    assert_eq!(value, 3);
}

#[test]
fn exhausted_transfer_surfaces_the_last_error() {
    let mut attempts = 0;
    let err = with_retry("dead transfer", || -> anyhow::Result<()> {
        attempts += 1;
        Err(anyhow::anyhow!("failure on attempt {attempts}"))
    })
    .expect_err("retries exhausted");
    assert_eq!(attempts, 3);
    assert_eq!(err.to_string(), "failure on attempt 3");
}

#[test]
fn remote_basename_ignores_trailing_separator() {
    assert_eq!(remote_basename("gs://bucket/plink_files/"), "plink_files");
    assert_eq!(remote_basename("gs://bucket/genes.txt"), "genes.txt");
    assert_eq!(remote_basename("genes.txt"), "genes.txt");
}
