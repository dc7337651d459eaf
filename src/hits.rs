//! Hit extraction
//!
//! Parses the motif searcher's tabular hit report and selects the predicted
//! sequences it names.
//!
//! # Hit table format (whitespace separated, '#' lines are comments)
//! ```text
//! Col  Description
//! 1    Target name (gene id)
//! 2    Target accession
//! 3    Query name (motif)
//! 4    Query accession
//! 5    Full-sequence E-value
//! 6    Full-sequence score
//! 7    Full-sequence bias
//! ```
//!
//! The score threshold is applied when the table is loaded, so the same file
//! can be re-filtered with a different cutoff.
//!
//! Extraction is two-level: proteins are selected by hit id and length, then
//! genes are selected by membership in the proteins that were written.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;

use crate::seqio::{FastaReader, FastaWriter};

// ============================================================================
// Hit Table
// ============================================================================

/// One motif-search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct HitRow {
    pub target_name: String,
    pub evalue: f64,
    pub score: f64,
}

impl HitRow {
    /// Parses one data line of the hit report.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            anyhow::bail!("Invalid hit line: expected at least 7 columns, got {}", fields.len());
        }

        Ok(Self {
            target_name: fields[0].to_string(),
            evalue: fields[4]
                .parse()
                .with_context(|| format!("Invalid E-value '{}'", fields[4]))?,
            score: fields[5]
                .parse()
                .with_context(|| format!("Invalid score '{}'", fields[5]))?,
        })
    }
}

/// Hits of one category that pass its score threshold.
#[derive(Debug, Clone, Default)]
pub struct HitTable {
    rows: Vec<HitRow>,
}

impl HitTable {
    /// Loads a hit report, keeping rows with `score >= threshold`.
    pub fn load<P: AsRef<Path>>(path: P, threshold: f64) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open hit table: {}", path.display()))?;
        Self::from_reader(BufReader::new(file), threshold)
            .with_context(|| format!("Invalid hit table: {}", path.display()))
    }

    pub fn from_reader<R: BufRead>(reader: R, threshold: f64) -> Result<Self> {
        let mut rows = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let row = HitRow::parse_line(line).with_context(|| format!("line {}", idx + 1))?;
            if row.score >= threshold {
                rows.push(row);
            }
        }

        Ok(Self { rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Normalized gene ids of all hits.
    pub fn target_ids(&self) -> FxHashSet<String> {
        self.rows.iter().map(|r| gene_key(&r.target_name).to_string()).collect()
    }

    /// Detection scores, one per hit row.
    pub fn scores(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.score).collect()
    }

    /// Smallest E-value among the kept hits.
    pub fn best_evalue(&self) -> Option<f64> {
        self.rows.iter().map(|r| r.evalue).reduce(f64::min)
    }
}

/// Gene id used to match hits against predicted sequences: the
/// `<contig>_<ordinal>` token before any whitespace or coordinate fields.
pub fn gene_key(id: &str) -> &str {
    id.split_whitespace().next().unwrap_or(id)
}

// ============================================================================
// Hit Extractor
// ============================================================================

/// Result of one extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractStats {
    pub scanned: usize,
    pub written: usize,
    /// Gene keys of the written records.
    pub ids: FxHashSet<String>,
}

/// Writes the subset of a FASTA file whose ids appear in a hit set.
#[derive(Debug, Clone, Copy)]
pub struct HitExtractor {
    /// Sequences must be strictly longer than this.
    pub min_len: usize,
}

impl HitExtractor {
    pub fn new(min_len: usize) -> Self {
        Self { min_len }
    }

    /// Copies hit records longer than `min_len` from `input` to `output`.
    ///
    /// Output order follows `input`. `output` is truncated first, so an empty
    /// hit set yields an empty file.
    pub fn extract(&self, hit_ids: &FxHashSet<String>, input: &Path, output: &Path) -> Result<ExtractStats> {
        copy_matching(hit_ids, input, output, self.min_len)
    }

    /// Copies the genes whose proteins were extracted.
    ///
    /// Membership alone decides; `protein_ids` is already length filtered.
    pub fn select_genes(protein_ids: &FxHashSet<String>, input: &Path, output: &Path) -> Result<ExtractStats> {
        copy_matching(protein_ids, input, output, 0)
    }
}

fn copy_matching(ids: &FxHashSet<String>, input: &Path, output: &Path, min_len: usize) -> Result<ExtractStats> {
    let mut writer = FastaWriter::create(output)?;
    let mut stats = ExtractStats::default();

    if !ids.is_empty() {
        for record in FastaReader::open(input)? {
            let record = record?;
            stats.scanned += 1;
            let key = gene_key(&record.name);
            if record.seq.len() > min_len && ids.contains(key) {
                writer.write_record(&record)?;
                stats.written += 1;
                stats.ids.insert(key.to_string());
            }
        }
    }

    writer.finish()?;
    Ok(stats)
}

// ============================================================================
// Tests
// ============================================================================
