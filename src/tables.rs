//! Output tables
//!
//! Per-sample abundance tables are the one resource several category workers
//! write to. Each table is created with its header before any worker starts
//! and every append holds that table's lock for the whole line, so rows from
//! different categories never interleave.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;

use crate::abundance::{fmt_optional, AbundanceRecord, GeneAbundance};
use crate::error::PipelineError;
use crate::workspace::WorkspaceLayout;

pub const SAMPLE_TABLE_HEADER: &str = "plastic name\treads mapped\ttotal reads\tproportion\trpkm";

pub const SUMMARY_TABLE_HEADER: &str =
    "sample\tplastic name\trpkm\tmean score\tscore std\tscore sem\treads mapped\ttotal reads\tproportion";

pub const GENE_TABLE_HEADER: &str = "gene id\tlength\treads\trpkm\tz-score";

/// Append-only per-sample tables keyed by sample id.
pub struct SampleTables {
    tables: FxHashMap<String, Mutex<PathBuf>>,
}

impl SampleTables {
    /// Creates one table per sample, header first.
    ///
    /// An existing table is an error unless `force_overwrite` is set, in which
    /// case it is truncated.
    pub fn create(layout: &WorkspaceLayout, force_overwrite: bool) -> Result<Self, PipelineError> {
        let mut tables = FxHashMap::default();

        for sample in &layout.samples {
            let path = layout.sample_table(&sample.id);
            if path.exists() && !force_overwrite {
                return Err(PipelineError::config(format!(
                    "output table already exists: {} (use --force to overwrite)",
                    path.display()
                )));
            }

            let mut file = File::create(&path).map_err(|e| {
                PipelineError::config(format!("cannot create {}: {}", path.display(), e))
            })?;
            writeln!(file, "{}", SAMPLE_TABLE_HEADER).map_err(|e| {
                PipelineError::config(format!("cannot write {}: {}", path.display(), e))
            })?;

            tables.insert(sample.id.clone(), Mutex::new(path));
        }

        Ok(Self { tables })
    }

    /// Appends one record to its sample's table.
    pub fn append(&self, record: &AbundanceRecord) -> Result<()> {
        let table = self
            .tables
            .get(&record.sample_id)
            .ok_or_else(|| anyhow::anyhow!("No output table for sample '{}'", record.sample_id))?;

        let line = format!(
            "{}\t{}\t{}\t{}\t{:.4}\n",
            record.category,
            record.reads_mapped,
            record.total_reads,
            record.proportion_display(),
            record.rpkm
        );

        let path = table.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&*path)
            .with_context(|| format!("Failed to open output table: {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        Ok(())
    }
}

/// Writes every record of the run, ordered by sample then category.
pub fn write_summary_table(path: &Path, records: &[AbundanceRecord]) -> Result<()> {
    let mut sorted: Vec<&AbundanceRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        a.sample_id
            .cmp(&b.sample_id)
            .then_with(|| a.category.cmp(&b.category))
    });

    let file = File::create(path)
        .with_context(|| format!("Failed to create summary table: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", SUMMARY_TABLE_HEADER)?;

    for r in sorted {
        writeln!(
            writer,
            "{}\t{}\t{:.4}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.sample_id,
            r.category,
            r.rpkm,
            fmt_optional(r.mean_score),
            fmt_optional(r.score_std),
            fmt_optional(r.score_sem),
            r.reads_mapped,
            r.total_reads,
            r.proportion_display()
        )?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes per-gene abundances of one (category, sample) run.
pub fn write_gene_table(path: &Path, genes: &[GeneAbundance]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create gene table: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", GENE_TABLE_HEADER)?;

    for g in genes {
        writeln!(
            writer,
            "{}\t{}\t{}\t{:.4}\t{}",
            g.gene_id,
            g.length,
            g.reads,
            g.rpkm,
            fmt_optional(g.z_score)
        )?;
    }

    writer.flush()?;
    Ok(())
}
