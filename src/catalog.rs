//! Category catalog
//!
//! Resolves the enzyme/plastic categories a run covers, either from an
//! explicit list or from every `<name>.hmm` profile in the reference motif
//! directory, and attaches each category's score threshold from
//! `bitscores.txt` (`name:value` per line).
//!
//! The resolved list is built once and owned by the run; later changes to the
//! motif directory are not observed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::CategorySelector;
use crate::error::PipelineError;

pub const THRESHOLD_FILE: &str = "bitscores.txt";
const MOTIF_EXT: &str = "hmm";

/// A named enzyme/plastic class.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    /// Lower-case name, unique within a run.
    pub name: String,
    /// Reference motif profile.
    pub motif: PathBuf,
    /// Minimum detection score; `None` when the threshold file has no entry.
    pub threshold: Option<f64>,
}

/// Category name -> score cutoff.
#[derive(Debug, Clone, Default)]
pub struct ThresholdTable {
    cutoffs: FxHashMap<String, f64>,
}

impl ThresholdTable {
    /// Parses a `name:value` threshold file.
    ///
    /// Names are matched case-insensitively and a trailing `.hmm` is ignored,
    /// so `PET.hmm: 120` and `pet:120` are the same entry.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read threshold file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid threshold file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut cutoffs = FxHashMap::default();

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("line {}: expected 'name:value', got '{}'", idx + 1, line))?;
            let value: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("line {}: invalid score '{}'", idx + 1, value.trim()))?;

            cutoffs.insert(normalize_name(name), value);
        }

        Ok(Self { cutoffs })
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.cutoffs.get(&normalize_name(category)).copied()
    }
}

fn normalize_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_suffix(".hmm") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// The categories of one run, in a fixed order.
#[derive(Debug, Clone)]
pub struct CategoryCatalog {
    categories: Vec<Category>,
}

impl CategoryCatalog {
    /// Resolves the selector against the motif directory.
    pub fn resolve(selector: &CategorySelector, motif_dir: &Path) -> Result<Self, PipelineError> {
        if !motif_dir.is_dir() {
            return Err(PipelineError::missing_path("Motif directory", motif_dir));
        }

        let threshold_path = motif_dir.join(THRESHOLD_FILE);
        if !threshold_path.is_file() {
            return Err(PipelineError::missing_path("Threshold file", &threshold_path));
        }
        let thresholds = ThresholdTable::load(&threshold_path)
            .map_err(|e| PipelineError::config(format!("{:#}", e)))?;

        let available = scan_motifs(motif_dir)
            .map_err(|e| PipelineError::config(format!("{:#}", e)))?;

        let names: Vec<String> = match selector {
            CategorySelector::All => available.keys().cloned().collect(),
            CategorySelector::List(names) => names.clone(),
        };

        let mut seen = FxHashSet::default();
        let mut categories = Vec::with_capacity(names.len());
        for name in names {
            let name = name.to_lowercase();
            if !seen.insert(name.clone()) {
                continue;
            }
            let motif = available
                .get(&name)
                .cloned()
                .unwrap_or_else(|| motif_dir.join(format!("{}.{}", name, MOTIF_EXT)));
            let threshold = thresholds.get(&name);
            categories.push(Category { name, motif, threshold });
        }

        if matches!(selector, CategorySelector::All) {
            categories.sort_by(|a, b| a.name.cmp(&b.name));
        }

        if categories.is_empty() {
            return Err(PipelineError::config(format!(
                "no categories selected (no .{} profiles in {})",
                MOTIF_EXT,
                motif_dir.display()
            )));
        }

        Ok(Self { categories })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Lower-cased profile stem -> profile path.
fn scan_motifs(motif_dir: &Path) -> Result<FxHashMap<String, PathBuf>> {
    let mut found = FxHashMap::default();

    for entry in fs::read_dir(motif_dir)
        .with_context(|| format!("Failed to list motif directory: {}", motif_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_motif = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(MOTIF_EXT))
            .unwrap_or(false);
        if !is_motif {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            found.entry(stem.to_lowercase()).or_insert(path.clone());
        }
    }

    Ok(found)
}

/// Copies a category's motif profile into `dest_dir` and returns its threshold.
pub fn fetch_motif(name: &str, motif_dir: &Path, dest_dir: &Path) -> Result<(PathBuf, Option<f64>)> {
    let available = scan_motifs(motif_dir)?;
    let key = name.to_lowercase();
    let src = available
        .get(&key)
        .ok_or_else(|| anyhow::anyhow!("Motif '{}' not found in {}", name, motif_dir.display()))?;

    fs::create_dir_all(dest_dir)?;
    let file_name = src
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid motif path: {}", src.display()))?;
    let dest = dest_dir.join(file_name);
    fs::copy(src, &dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;

    let threshold_path = motif_dir.join(THRESHOLD_FILE);
    let threshold = if threshold_path.is_file() {
        ThresholdTable::load(&threshold_path)?.get(&key)
    } else {
        None
    };

    Ok((dest, threshold))
}
