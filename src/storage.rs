use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

/// Object-storage collaborator used to stage all inputs and publish the
/// results and reports. Listing also backs input classification: a
/// reference that lists to one entry is a file, more than one is a panel
/// directory.
pub trait Storage: Send + Sync {
    /// List the entries directly under a remote location. A nonexistent
    /// location is an error, not an empty listing.
    fn list(&self, remote: &str) -> Result<Vec<String>>;

    /// Copy a single remote object to a local path.
    fn fetch(&self, remote: &str, local: &Path) -> Result<()>;

    /// Copy the contents of a remote folder into a local directory.
    fn fetch_dir(&self, remote: &str, local: &Path) -> Result<()>;

    /// Copy a local file to a remote location.
    fn publish(&self, local: &Path, remote: &str) -> Result<()>;

    /// Copy the contents of a local directory to a remote location.
    fn publish_dir(&self, local: &Path, remote: &str) -> Result<()>;
}

const TRANSFER_ATTEMPTS: usize = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Bounded retry with linear backoff. Transfers are the one collaborator
/// where transient failures are expected; engine invocations are
/// deterministic about their arguments and are never retried.
pub fn with_retry<T>(what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut last = None;
    for attempt in 1..=TRANSFER_ATTEMPTS {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!("{what} failed on attempt {attempt}/{TRANSFER_ATTEMPTS}: {err:#}");
                last = Some(err);
                if attempt < TRANSFER_ATTEMPTS {
                    thread::sleep(BACKOFF_BASE * attempt as u32);
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| anyhow!("{what} failed")))
}

/// Last path component of a remote reference, trailing separators ignored.
pub fn remote_basename(reference: &str) -> String {
    let trimmed = reference.trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

/// `gsutil`-backed storage, matching the bucket layout the pipeline is
/// deployed against.
pub struct GsutilStorage;

impl GsutilStorage {
    fn run(args: &[&str]) -> Result<Vec<u8>> {
        debug!("gsutil {}", args.join(" "));
        let output = Command::new("gsutil")
            .args(args)
            .output()
            .context("spawn gsutil")?;
        if !output.status.success() {
            return Err(anyhow!(
                "gsutil {} failed ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output.stdout)
    }
}

impl Storage for GsutilStorage {
    fn list(&self, remote: &str) -> Result<Vec<String>> {
        // Listed as given: a file lists itself (one entry), a folder lists
        // its contents. Classification depends on that distinction.
        let stdout = Self::run(&["ls", remote])?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn fetch(&self, remote: &str, local: &Path) -> Result<()> {
        let local = local.to_string_lossy();
        with_retry(&format!("fetch {remote}"), || {
            Self::run(&["cp", remote, &local]).map(|_| ())
        })
    }

    fn fetch_dir(&self, remote: &str, local: &Path) -> Result<()> {
        let glob = format!("{}/*", remote.trim_end_matches('/'));
        let local = local.to_string_lossy();
        with_retry(&format!("fetch {remote}"), || {
            Self::run(&["-m", "cp", "-r", &glob, &local]).map(|_| ())
        })
    }

    fn publish(&self, local: &Path, remote: &str) -> Result<()> {
        let target = format!("{}/", remote.trim_end_matches('/'));
        let local = local.to_string_lossy();
        with_retry(&format!("publish {local}"), || {
            Self::run(&["cp", &local, &target]).map(|_| ())
        })
    }

    fn publish_dir(&self, local: &Path, remote: &str) -> Result<()> {
        let glob = format!("{}/*", local.to_string_lossy());
        let target = format!("{}/", remote.trim_end_matches('/'));
        with_retry(&format!("publish {glob}"), || {
            Self::run(&["-m", "cp", "-r", &glob, &target]).map(|_| ())
        })
    }
}

/// Plain-filesystem storage. Lets the whole pipeline run against local
/// directory trees and backs the integration tests.
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn list(&self, remote: &str) -> Result<Vec<String>> {
        let path = Path::new(remote);
        if path.is_file() {
            return Ok(vec![remote.to_string()]);
        }
        let entries = fs::read_dir(path).with_context(|| format!("list {remote}"))?;
        let mut out = Vec::new();
        for entry in entries {
            out.push(entry?.path().to_string_lossy().into_owned());
        }
        out.sort();
        Ok(out)
    }

    fn fetch(&self, remote: &str, local: &Path) -> Result<()> {
        fs::copy(remote, local).with_context(|| format!("copy {remote}"))?;
        Ok(())
    }

    fn fetch_dir(&self, remote: &str, local: &Path) -> Result<()> {
        copy_dir_contents(Path::new(remote), local)
    }

    fn publish(&self, local: &Path, remote: &str) -> Result<()> {
        let target = Path::new(remote);
        fs::create_dir_all(target)?;
        let name = local
            .file_name()
            .ok_or_else(|| anyhow!("cannot publish {}", local.display()))?;
        fs::copy(local, target.join(name)).with_context(|| format!("copy {}", local.display()))?;
        Ok(())
    }

    fn publish_dir(&self, local: &Path, remote: &str) -> Result<()> {
        copy_dir_contents(local, Path::new(remote))
    }
}

fn copy_dir_contents(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from).with_context(|| format!("read {}", from.display()))? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copy_dir_contents(&source, &target)?;
        } else {
            fs::copy(&source, &target)
                .with_context(|| format!("copy {}", source.display()))?;
        }
    }
    Ok(())
}
