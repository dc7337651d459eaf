//! Per-category quantification pipeline
//!
//! Each category runs as one independent unit of work:
//!
//! ```text
//! PENDING -> EXTRACTING -> CORRECTING -> COUNTING -> REDUCING -> DONE
//!      \___________\____________\___________\___________> FAILED
//! ```
//!
//! Categories fan out over a rayon pool; a failed category is recorded and
//! its siblings continue. Inside a category, samples are counted one at a
//! time. A sample whose counter run yields nothing contributes a zero record
//! and is listed as skipped.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::abundance::{gene_abundances, AbundanceRecord, ScoreStats};
use crate::catalog::{Category, CategoryCatalog, THRESHOLD_FILE};
use crate::config::RunConfig;
use crate::coords::{correct_fasta, write_interval_table};
use crate::counting::{CountSummary, FeatureCount, ReadCounter};
use crate::error::PipelineError;
use crate::hits::{HitExtractor, HitTable};
use crate::tables::{write_gene_table, write_summary_table, SampleTables};
use crate::workspace::{CategoryPaths, Sample, WorkspaceLayout};

// ============================================================================
// States and Progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CategoryState {
    Pending,
    Extracting,
    Correcting,
    Counting,
    Reducing,
    Done,
    Failed,
}

impl fmt::Display for CategoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CategoryState::Pending => "PENDING",
            CategoryState::Extracting => "EXTRACTING",
            CategoryState::Correcting => "CORRECTING",
            CategoryState::Counting => "COUNTING",
            CategoryState::Reducing => "REDUCING",
            CategoryState::Done => "DONE",
            CategoryState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Structured progress notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StateChanged { category: String, state: CategoryState },
    SampleCounted { category: String, sample: String },
    SampleSkipped { category: String, sample: String, reason: String },
    CategoryFailed { category: String, reason: String },
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Default sink: forwards events to the logger.
pub fn log_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::StateChanged { category, state } => {
            debug!("[{}] {}", category, state);
        }
        ProgressEvent::SampleCounted { category, sample } => {
            info!("[{}] counted {}", category, sample);
        }
        ProgressEvent::SampleSkipped { category, sample, reason } => {
            warn!("[{}] sample {} skipped: {}", category, sample, reason);
        }
        ProgressEvent::CategoryFailed { category, reason } => {
            warn!("[{}] FAILED: {}", category, reason);
        }
    }
}

// ============================================================================
// Run Report
// ============================================================================

/// Final state of one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryOutcome {
    pub category: String,
    pub state: CategoryState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub hits: usize,
    pub records: usize,
}

/// A sample that contributed zero to a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedSample {
    pub category: String,
    pub sample: String,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub categories: Vec<String>,
    pub outcomes: Vec<CategoryOutcome>,
    pub skipped_samples: Vec<SkippedSample>,
    pub record_count: usize,
    #[serde(skip)]
    pub records: Vec<AbundanceRecord>,
}

impl RunReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        Ok(())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CategoryOutcome> {
        self.outcomes.iter().filter(|o| o.state == CategoryState::Failed)
    }

    pub fn outcome(&self, category: &str) -> Option<&CategoryOutcome> {
        self.outcomes.iter().find(|o| o.category == category)
    }

    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none() && self.skipped_samples.is_empty()
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    layout: WorkspaceLayout,
    catalog: CategoryCatalog,
    counter: Box<dyn ReadCounter>,
    progress: ProgressCallback,
}

impl<'a> Pipeline<'a> {
    /// Resolves the workspace and categories. Every error here is fatal.
    pub fn new(config: &'a RunConfig, counter: Box<dyn ReadCounter>) -> Result<Self, PipelineError> {
        let layout = WorkspaceLayout::resolve(config)?;
        let catalog = CategoryCatalog::resolve(&config.categories, &config.motif_dir)?;

        Ok(Self {
            config,
            layout,
            catalog,
            counter,
            progress: Arc::new(log_progress),
        })
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn catalog(&self) -> &CategoryCatalog {
        &self.catalog
    }

    /// Runs every category and writes the run-wide outputs.
    ///
    /// Category and sample failures end up in the report; only setup errors
    /// and failures to write the final summary are returned as `Err`.
    pub fn run(&self) -> Result<RunReport> {
        let started_at = timestamp();
        let tables = SampleTables::create(&self.layout, self.config.force_overwrite)?;

        let workers = self.config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| PipelineError::config(format!("cannot start worker pool: {}", e)))?;

        info!(
            "Processing {} categor{} x {} sample(s) with {} worker(s)",
            self.catalog.len(),
            if self.catalog.len() == 1 { "y" } else { "ies" },
            self.layout.samples.len(),
            workers
        );

        let results: Vec<CategoryResult> = pool.install(|| {
            self.catalog
                .categories()
                .par_iter()
                .map(|category| self.process_category(category, &tables))
                .collect()
        });

        let mut report = RunReport {
            started_at,
            finished_at: String::new(),
            categories: self.catalog.names(),
            outcomes: Vec::with_capacity(results.len()),
            skipped_samples: Vec::new(),
            record_count: 0,
            records: Vec::new(),
        };
        for result in results {
            report.outcomes.push(result.outcome);
            report.skipped_samples.extend(result.skipped);
            report.records.extend(result.records);
        }
        report.record_count = report.records.len();

        write_summary_table(&self.layout.summary_table(), &report.records)?;
        report.finished_at = timestamp();
        report.save(&self.layout.run_report())?;

        Ok(report)
    }

    fn process_category(&self, category: &Category, tables: &SampleTables) -> CategoryResult {
        let mut run = CategoryRun::new(&category.name, &self.progress);

        match self.run_category(category, tables, &mut run) {
            Ok(()) => run.transition(CategoryState::Done),
            Err(e) => run.fail(PipelineError::Category {
                category: category.name.clone(),
                reason: format!("{:#}", e),
            }),
        }

        run.finish()
    }

    fn run_category(&self, category: &Category, tables: &SampleTables, run: &mut CategoryRun) -> Result<()> {
        let name = category.name.as_str();
        let paths = CategoryPaths::new(&self.layout, name);

        // Extraction
        run.transition(CategoryState::Extracting);
        let threshold = category.threshold.ok_or_else(|| {
            anyhow::anyhow!("no score threshold for '{}' in {}", name, THRESHOLD_FILE)
        })?;
        if !paths.hit_table.is_file() {
            anyhow::bail!("hit table not found: {}", paths.hit_table.display());
        }

        let hit_table = HitTable::load(&paths.hit_table, threshold)?;
        run.hits = hit_table.len();
        if hit_table.is_empty() {
            debug!("[{}] no hits >= {} in {}", name, threshold, paths.hit_table.display());
        }

        let extractor = HitExtractor::new(self.config.min_seq_len);
        let proteins = extractor.extract(&hit_table.target_ids(), &self.layout.protein_fasta, &paths.hit_proteins)?;
        let genes = HitExtractor::select_genes(&proteins.ids, &self.layout.gene_fasta, &paths.hit_genes)?;
        debug!(
            "[{}] {} hit(s) >= {} (best E-value {:?}); {}/{} protein(s), {}/{} gene(s) extracted",
            name,
            hit_table.len(),
            threshold,
            hit_table.best_evalue(),
            proteins.written,
            proteins.scanned,
            genes.written,
            genes.scanned
        );

        if self.config.export_hits {
            let dest = self.layout.exported_hits(name);
            fs::copy(&paths.hit_proteins, &dest)
                .with_context(|| format!("Failed to export hits to {}", dest.display()))?;
        }

        let scores = ScoreStats::from_scores(&hit_table.scores());

        // Correction
        run.transition(CategoryState::Correcting);
        correct_fasta(&paths.hit_genes, &paths.corrected_genes)?;
        let intervals = write_interval_table(&paths.corrected_genes, &paths.intervals)?;

        // Counting
        run.transition(CategoryState::Counting);
        let mut counted: Vec<(&Sample, Option<(CountSummary, Vec<FeatureCount>)>)> =
            Vec::with_capacity(self.layout.samples.len());
        if intervals.is_empty() {
            info!("[{}] no hits; recording zero abundance", name);
            counted.extend(self.layout.samples.iter().map(|s| (s, None)));
        } else {
            for sample in &self.layout.samples {
                match self.count_sample(&paths, name, sample) {
                    Ok(counts) => {
                        run.emit(ProgressEvent::SampleCounted {
                            category: name.to_string(),
                            sample: sample.id.clone(),
                        });
                        counted.push((sample, Some(counts)));
                    }
                    Err(e) => {
                        run.skip(PipelineError::SampleCounting {
                            category: name.to_string(),
                            sample: sample.id.clone(),
                            reason: format!("{:#}", e),
                        });
                        counted.push((sample, None));
                    }
                }
            }
        }

        // Reduction: every record is built before any reaches a sample table
        run.transition(CategoryState::Reducing);
        let mut records = Vec::with_capacity(counted.len());
        for (sample, counts) in counted {
            let record = match counts {
                Some((summary, features)) => {
                    let genes = gene_abundances(&features, summary.total_reads);
                    write_gene_table(&paths.gene_abundance(&sample.id), &genes)?;
                    AbundanceRecord::reduce(&sample.id, name, &summary, &features, &scores)
                }
                None => AbundanceRecord::empty(&sample.id, name, &scores),
            };
            records.push(record);
        }

        for record in records {
            tables.append(&record)?;
            run.records.push(record);
        }

        Ok(())
    }

    fn count_sample(
        &self,
        paths: &CategoryPaths,
        category: &str,
        sample: &Sample,
    ) -> Result<(CountSummary, Vec<FeatureCount>)> {
        let prefix = paths.counts_prefix(category, &sample.id);
        let log = paths.counter_log(&sample.id);
        let outputs = self
            .counter
            .count(&paths.intervals, &sample.alignment, &prefix, &log)?;
        outputs.load()
    }
}

// ============================================================================
// Per-category Bookkeeping
// ============================================================================

struct CategoryResult {
    outcome: CategoryOutcome,
    skipped: Vec<SkippedSample>,
    records: Vec<AbundanceRecord>,
}

struct CategoryRun<'p> {
    name: String,
    state: CategoryState,
    cause: Option<String>,
    hits: usize,
    skipped: Vec<SkippedSample>,
    records: Vec<AbundanceRecord>,
    progress: &'p ProgressCallback,
}

impl<'p> CategoryRun<'p> {
    fn new(name: &str, progress: &'p ProgressCallback) -> Self {
        Self {
            name: name.to_string(),
            state: CategoryState::Pending,
            cause: None,
            hits: 0,
            skipped: Vec::new(),
            records: Vec::new(),
            progress,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        (self.progress)(&event);
    }

    fn transition(&mut self, state: CategoryState) {
        self.state = state;
        self.emit(ProgressEvent::StateChanged {
            category: self.name.clone(),
            state,
        });
    }

    fn fail(&mut self, err: PipelineError) {
        self.transition(CategoryState::Failed);
        if let PipelineError::Category { reason, .. } = &err {
            self.emit(ProgressEvent::CategoryFailed {
                category: self.name.clone(),
                reason: reason.clone(),
            });
        }
        self.cause = Some(err.to_string());
    }

    fn skip(&mut self, err: PipelineError) {
        if let PipelineError::SampleCounting { sample, reason, .. } = &err {
            self.emit(ProgressEvent::SampleSkipped {
                category: self.name.clone(),
                sample: sample.clone(),
                reason: reason.clone(),
            });
            self.skipped.push(SkippedSample {
                category: self.name.clone(),
                sample: sample.clone(),
                cause: err.to_string(),
            });
        }
    }

    fn finish(self) -> CategoryResult {
        // A failed category contributes nothing to the run-wide aggregation
        let (records, skipped) = if self.state == CategoryState::Failed {
            (Vec::new(), Vec::new())
        } else {
            (self.records, self.skipped)
        };

        CategoryResult {
            outcome: CategoryOutcome {
                category: self.name,
                state: self.state,
                cause: self.cause,
                hits: self.hits,
                records: records.len(),
            },
            skipped,
            records,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
