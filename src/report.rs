use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Append one audit block describing a pipeline invocation: the summary
/// statistics analyzed, the main and conditioning panels, and the result
/// files. The report accumulates across runs sharing a name; it is never
/// truncated and never deduplicated.
pub fn append_report(
    report_path: &Path,
    sum_stats: &[String],
    main_panels: &[String],
    cond_panels: &str,
    out_files: &[String],
) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(report_path)
        .with_context(|| format!("open report {}", report_path.display()))?;
    writeln!(file, "Summary statistic(s) used: {}", sum_stats.join("\t"))?;
    writeln!(file, "Main panel(s) used: {}", main_panels.join("\t"))?;
    writeln!(file, "Conditional panel(s) used: {cond_panels}")?;
    writeln!(file, "Main output file(s): {}", out_files.join("\t"))?;
    Ok(())
}
