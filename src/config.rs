//! Run configuration.
//!
//! Everything a run needs is gathered into one immutable [`RunConfig`] built
//! from the command line and passed by reference into the pipeline. External
//! program locations are resolved once into [`ToolPaths`].

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;

/// Read counter binary consumed by the counting stage.
pub const FEATURE_COUNTS: &str = "featureCounts";

/// Proteins at or below this many residues are not reported as hits.
pub const DEFAULT_MIN_SEQ_LEN: usize = 10;

pub const DEFAULT_POLL_MS: u64 = 100;

/// Which categories a run covers.
#[derive(Debug, Clone, PartialEq)]
pub enum CategorySelector {
    /// Every category with a motif profile in the reference directory.
    All,
    /// Explicit, lower-cased names in user order.
    List(Vec<String>),
}

impl CategorySelector {
    /// Parses `all` or a comma separated list of category names.
    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let names: Vec<String> = value
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        if names.is_empty() {
            return Err(PipelineError::config("category selection is empty"));
        }
        // Names become directory names under temps/
        if let Some(bad) = names
            .iter()
            .find(|n| n.contains('/') || n.contains('\\') || n.contains(".."))
        {
            return Err(PipelineError::config(format!("invalid category name '{}'", bad)));
        }
        Ok(Self::List(names))
    }
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub categories: CategorySelector,
    /// Fan categories out over a worker pool. When false one worker is used.
    pub parallel: bool,
    /// Worker count when parallel; 0 means one per logical core.
    pub threads: usize,
    /// Replace existing per-sample output tables instead of refusing to run.
    pub force_overwrite: bool,
    pub workspace_root: PathBuf,
    pub contigs_path: PathBuf,
    pub sample_alignment_paths: Vec<PathBuf>,
    /// Reference motif directory (`<name>.hmm` profiles plus `bitscores.txt`).
    pub motif_dir: PathBuf,
    pub min_seq_len: usize,
    pub poll_interval: Duration,
    /// Upper bound on a single counter invocation. `None` waits forever.
    pub counter_timeout: Option<Duration>,
    /// Copy each category's protein hits into the output directory.
    pub export_hits: bool,
}

impl RunConfig {
    /// Configuration with defaults for everything but the required paths.
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        contigs_path: impl Into<PathBuf>,
        sample_alignment_paths: Vec<PathBuf>,
        categories: CategorySelector,
    ) -> Self {
        let workspace_root = workspace_root.into();
        let motif_dir = workspace_root.join("motifs");
        Self {
            categories,
            parallel: false,
            threads: 0,
            force_overwrite: false,
            workspace_root,
            contigs_path: contigs_path.into(),
            sample_alignment_paths,
            motif_dir,
            min_seq_len: DEFAULT_MIN_SEQ_LEN,
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            counter_timeout: None,
            export_hits: false,
        }
    }

    /// Number of category workers.
    pub fn worker_count(&self) -> usize {
        if !self.parallel {
            1
        } else if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }

    /// Splits a comma separated list of alignment paths.
    pub fn parse_alignment_list(value: &str) -> Vec<PathBuf> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

/// Absolute locations of the external programs used by a run.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub feature_counts: PathBuf,
}

impl ToolPaths {
    /// Resolves every required program once, before any work starts.
    pub fn locate() -> Result<Self, PipelineError> {
        Ok(Self {
            feature_counts: find_executable(FEATURE_COUNTS)?,
        })
    }
}

/// Looks a program up by absolute path or in `PATH`.
pub fn find_executable(name: &str) -> Result<PathBuf, PipelineError> {
    let path = Path::new(name);
    if path.is_absolute() && is_executable(path) {
        return Ok(path.to_path_buf());
    }

    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if is_executable(&full_path) {
                return Ok(full_path);
            }
        }
    }

    Err(PipelineError::DependencyMissing {
        program: name.to_string(),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
