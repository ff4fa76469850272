use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// A resolved, chromosome-templated path prefix: the common leading string
/// of the per-chromosome files in one LD-score or genotype panel directory.
/// The chromosome number and remaining suffix are implied by convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panel(String);

impl Panel {
    pub fn new(prefix: impl Into<String>) -> Self {
        Panel(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve a directory of per-chromosome files to its panel prefix.
    /// An empty or unreadable directory is a configuration error: a panel
    /// must resolve to a non-empty prefix.
    pub fn from_dir(dir: &Path) -> Result<Panel> {
        let entries =
            fs::read_dir(dir).map_err(|_| PipelineError::EmptyPanel(dir.to_path_buf()))?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path().to_string_lossy().into_owned());
        }
        let prefix = common_prefix(&paths);
        if prefix.is_empty() {
            return Err(PipelineError::EmptyPanel(dir.to_path_buf()));
        }
        Ok(Panel(prefix))
    }
}

impl std::fmt::Display for Panel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Longest common leading substring of a set of pathnames, character-wise.
/// Comparing only the lexicographic extremes is enough: any divergence in
/// the set shows up between the min and max first. Character-wise (not
/// path-component-wise) comparison keeps `panel.1.` and `panel.22.` sharing
/// the `panel.` prefix regardless of digit width.
pub fn common_prefix(paths: &[String]) -> String {
    let (Some(s1), Some(s2)) = (paths.iter().min(), paths.iter().max()) else {
        return String::new();
    };
    let mut end = 0;
    for ((i, a), b) in s1.char_indices().zip(s2.chars()) {
        if a != b {
            return s1[..i].to_string();
        }
        end = i + a.len_utf8();
    }
    s1[..end].to_string()
}
