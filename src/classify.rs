use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;

use crate::error::PipelineError;
use crate::storage::Storage;
use crate::types::{AnnotationKind, AnnotationSource, IdKind, ValueType};

/// Decide whether a reference names a gene-list file or a directory of
/// precomputed per-chromosome LD scores. Listing yields one entry for a
/// file and several for a panel; a listing failure means the location does
/// not exist and is fatal.
pub fn classify(storage: &dyn Storage, reference: &str) -> Result<AnnotationSource> {
    let entries = storage.list(reference).with_context(|| {
        format!("Some LD scores or gene-set file(s) you specified do not exist: {reference}")
    })?;
    let kind = match entries.len() {
        0 => {
            return Err(PipelineError::InvalidArgument(format!(
                "{reference} exists but lists no entries"
            ))
            .into());
        }
        1 => AnnotationKind::GeneList,
        _ => AnnotationKind::ScorePanel,
    };
    Ok(AnnotationSource {
        location: reference.to_string(),
        kind,
        value_type: ValueType::Unknown,
        id_kind: IdKind::GeneName,
    })
}

/// Classify a group of references together. Members must agree in kind;
/// gene lists and score panels cannot be mixed within one group.
pub fn classify_group(storage: &dyn Storage, references: &[String]) -> Result<Vec<AnnotationSource>> {
    let mut sources = Vec::with_capacity(references.len());
    for reference in references {
        sources.push(classify(storage, reference)?);
    }
    if sources.windows(2).any(|pair| pair[0].kind != pair[1].kind) {
        return Err(PipelineError::MixedSources.into());
    }
    Ok(sources)
}

/// Inspect a staged gene list: more than one whitespace-delimited column
/// means a continuous annotation, and a leading `rs` token means the rows
/// carry SNP identifiers rather than gene names.
pub fn type_of_file(path: &Path) -> Result<(ValueType, IdKind)> {
    let reader = open_maybe_compressed(path)?;
    for line in reader.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let value_type = if fields.len() > 1 {
            ValueType::Continuous
        } else {
            ValueType::Binary
        };
        let id_kind = if fields[0].starts_with("rs") {
            IdKind::SnpId
        } else {
            IdKind::GeneName
        };
        return Ok((value_type, id_kind));
    }
    Err(PipelineError::InvalidArgument(format!("{} is empty", path.display())).into())
}

fn open_maybe_compressed(path: &Path) -> Result<Box<dyn BufRead>> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader: Box<dyn Read> = match ext.as_str() {
        "gz" => Box::new(GzDecoder::new(file)),
        "bz2" => Box::new(BzDecoder::new(file)),
        _ => Box::new(file),
    };
    Ok(Box::new(BufReader::new(reader)))
}
