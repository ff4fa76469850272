use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::types::IdKind;

/// One per-chromosome gene-set scoring call: turns a gene list into an
/// annotation file for that chromosome.
#[derive(Debug, Clone)]
pub struct AnnotRequest {
    pub gene_list: PathBuf,
    pub gene_annot: PathBuf,
    pub plink_prefix: String,
    pub ldscores_prefix: PathBuf,
    pub window_size: u32,
    pub gene_col: String,
    pub id_kind: IdKind,
    pub chromosome: u8,
}

/// Shape of one LD-score-mode regression call. Binary annotations go
/// through the plain thin-annotation path; continuous annotations are
/// binned by quantile count or by explicit breakpoints, never both.
#[derive(Debug, Clone)]
pub enum LdScoreMode {
    Thin { annot: PathBuf, snp_list: PathBuf },
    Quantiles { cont_bin: PathBuf, quantiles: usize },
    Breaks { cont_bin: PathBuf, breaks: Vec<f64> },
}

#[derive(Debug, Clone)]
pub struct LdScoreRequest {
    pub plink_prefix: String,
    pub chromosome: u8,
    pub mode: LdScoreMode,
    pub out_prefix: PathBuf,
}

/// One partitioned-heritability regression call for a single phenotype.
#[derive(Debug, Clone)]
pub struct H2Request {
    pub sumstats: PathBuf,
    pub conditioning_panel: String,
    pub params_file: PathBuf,
    pub weight_panel: String,
    pub frequency_panel: Option<String>,
    pub out_prefix: PathBuf,
}

pub trait ScoringEngine: Send + Sync {
    fn build_annotation(&self, request: &AnnotRequest) -> Result<()>;
}

pub trait RegressionEngine: Send + Sync {
    fn ld_scores(&self, request: &LdScoreRequest) -> Result<()>;
    fn partitioned_h2(&self, request: &H2Request) -> Result<()>;
}

/// External geneset-to-annotation script, invoked once per chromosome.
pub struct GenesetScorer {
    pub program: PathBuf,
    pub deadline: Option<Duration>,
}

impl ScoringEngine for GenesetScorer {
    fn build_annotation(&self, request: &AnnotRequest) -> Result<()> {
        let unit = format!(
            "gene-set scorer (chr {}, {})",
            request.chromosome,
            request.gene_list.display()
        );
        let mut cmd = Command::new(&self.program);
        cmd.arg("--geneset-file")
            .arg(&request.gene_list)
            .arg("--gene-annot")
            .arg(&request.gene_annot)
            .arg("--bfile-chr")
            .arg(&request.plink_prefix)
            .arg("--ldscores_prefix")
            .arg(&request.ldscores_prefix)
            .arg("--windowsize")
            .arg(request.window_size.to_string())
            .arg("--gene-col-name")
            .arg(&request.gene_col)
            .arg("--chrom")
            .arg(request.chromosome.to_string());
        if request.id_kind == IdKind::SnpId {
            cmd.arg("--rsids");
        }
        run_with_deadline(cmd, &unit, self.deadline)
    }
}

/// External LDSC executable, covering both invocation shapes: `--l2`
/// per-chromosome score generation and `--h2-cts` partitioned
/// heritability.
pub struct LdscExecutable {
    pub program: PathBuf,
    pub deadline: Option<Duration>,
}

impl RegressionEngine for LdscExecutable {
    fn ld_scores(&self, request: &LdScoreRequest) -> Result<()> {
        let unit = format!("ldsc --l2 (chr {})", request.chromosome);
        let mut cmd = Command::new(&self.program);
        cmd.arg("--l2")
            .arg("--bfile")
            .arg(format!("{}{}", request.plink_prefix, request.chromosome))
            .arg("--ld-wind-cm")
            .arg("1");
        match &request.mode {
            LdScoreMode::Thin { annot, snp_list } => {
                cmd.arg("--annot")
                    .arg(annot)
                    .arg("--thin-annot")
                    .arg("--out")
                    .arg(&request.out_prefix)
                    .arg("--print-snps")
                    .arg(snp_list);
            }
            LdScoreMode::Quantiles {
                cont_bin,
                quantiles,
            } => {
                cmd.arg("--cont-bin")
                    .arg(cont_bin)
                    .arg("--cont-quantiles")
                    .arg(quantiles.to_string())
                    .arg("--thin-annot")
                    .arg("--out")
                    .arg(&request.out_prefix);
            }
            LdScoreMode::Breaks { cont_bin, breaks } => {
                let joined = breaks
                    .iter()
                    .map(f64::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                cmd.arg("--cont-bin")
                    .arg(cont_bin)
                    .arg("--cont-breaks")
                    .arg(joined)
                    .arg("--thin-annot")
                    .arg("--out")
                    .arg(&request.out_prefix);
            }
        }
        let result = run_with_deadline(cmd, &unit, self.deadline);
        // A failed quantile split almost always means non-unique bin edges;
        // surface the actionable fix instead of the raw engine error.
        match result {
            Err(PipelineError::Engine { unit, stderr, .. })
                if matches!(request.mode, LdScoreMode::Quantiles { .. }) =>
            {
                Err(PipelineError::QuantileBinning {
                    unit,
                    detail: stderr,
                })
            }
            other => other,
        }
    }

    fn partitioned_h2(&self, request: &H2Request) -> Result<()> {
        let unit = format!("ldsc --h2-cts ({})", request.sumstats.display());
        let mut cmd = Command::new(&self.program);
        cmd.arg("--h2-cts")
            .arg(&request.sumstats)
            .arg("--ref-ld-chr")
            .arg(&request.conditioning_panel)
            .arg("--ref-ld-chr-cts")
            .arg(&request.params_file)
            .arg("--w-ld-chr")
            .arg(&request.weight_panel);
        if let Some(frequency) = &request.frequency_panel {
            cmd.arg("--frqfile-chr").arg(frequency);
        }
        cmd.arg("--overlap-annot")
            .arg("--print-all-cts")
            .arg("--print-coefficients")
            .arg("--out")
            .arg(&request.out_prefix);
        run_with_deadline(cmd, &unit, self.deadline)
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run an external engine to completion, killing it if the deadline
/// elapses. Exit status is always checked; stderr is captured for the
/// diagnostic.
pub fn run_with_deadline(mut cmd: Command, unit: &str, deadline: Option<Duration>) -> Result<()> {
    debug!("running {unit}: {cmd:?}");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    // Drain stderr while polling so a chatty engine can never block on a
    // full pipe.
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });
    let started = Instant::now();
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if let Some(limit) = deadline
                    && started.elapsed() > limit
                {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PipelineError::Timeout {
                        unit: unit.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    };
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    if status.success() {
        return Ok(());
    }
    Err(PipelineError::Engine {
        unit: unit.to_string(),
        status: status.to_string(),
        stderr: stderr.trim().to_string(),
    })
}
