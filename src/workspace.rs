use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

/// Subdirectories every run starts with: staged summary statistics,
/// generated main LD scores, staged reference LD scores, conditioning
/// scores built from gene lists, staged precomputed conditioning panels,
/// and scratch annotation files.
const BASE_SUBDIRS: [&str; 6] = ["ss", "outld", "inld", "outcondld", "cond_ldscores", "tmp"];

/// Local working tree for one pipeline invocation. Every component receives
/// this value explicitly instead of assuming a fixed global path layout.
#[derive(Debug)]
pub struct WorkspaceContext {
    root: PathBuf,
    created: BTreeSet<PathBuf>,
}

impl WorkspaceContext {
    pub fn create(root: &Path) -> Result<Self> {
        info!("Creating folders under {}", root.display());
        fs::create_dir_all(root)
            .with_context(|| format!("create workspace root {}", root.display()))?;
        let mut workspace = WorkspaceContext {
            root: root.to_path_buf(),
            created: BTreeSet::new(),
        };
        for sub in BASE_SUBDIRS {
            workspace.ensure_dir(sub)?;
        }
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a file or directory inside the workspace; does not create it.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Create (if needed) and register a subdirectory, returning its path.
    pub fn ensure_dir(&mut self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = self.root.join(relative);
        if !self.created.contains(&dir) {
            fs::create_dir_all(&dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
            self.created.insert(dir.clone());
        }
        Ok(dir)
    }

    pub fn created_dirs(&self) -> impl Iterator<Item = &Path> {
        self.created.iter().map(PathBuf::as_path)
    }
}
