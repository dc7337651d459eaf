//! Workspace layout
//!
//! Resolves where every input, per-category scratch area and output lives,
//! and checks up front that the required inputs are present.
//!
//! ```text
//! <root>/temps/<contigs_base>.faa            predicted proteins
//! <root>/temps/<contigs_base>.ffn            predicted genes
//! <root>/temps/<category>/                   one exclusive area per category
//!     <contigs_base>_<category>_HMMER.out    motif-search hit table
//! <root>/output/<sample>.tsv                 per-sample abundance table
//! <root>/output/abundance_summary.tsv
//! <root>/output/run_summary.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::config::RunConfig;
use crate::error::PipelineError;

/// A sequencing sample: an id and its alignment file.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: String,
    pub alignment: PathBuf,
}

/// File name up to its first '.', e.g. `GC1.sorted.bam` -> `GC1`.
pub fn file_base(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.split('.').next().unwrap_or(n).to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
    pub temps: PathBuf,
    pub output: PathBuf,
    pub contigs_base: String,
    pub protein_fasta: PathBuf,
    pub gene_fasta: PathBuf,
    pub samples: Vec<Sample>,
}

impl WorkspaceLayout {
    /// Validates the inputs named by `config` and creates the output area.
    pub fn resolve(config: &RunConfig) -> Result<Self, PipelineError> {
        let root = config.workspace_root.clone();
        if !root.is_dir() {
            return Err(PipelineError::missing_path("Workspace directory", &root));
        }

        let temps = root.join("temps");
        if !temps.is_dir() {
            return Err(PipelineError::missing_path("Temps directory", &temps));
        }

        if !config.contigs_path.is_file() {
            return Err(PipelineError::missing_path("Contigs file", &config.contigs_path));
        }

        let contigs_base = file_base(&config.contigs_path);
        let protein_fasta = temps.join(format!("{}.faa", contigs_base));
        let gene_fasta = temps.join(format!("{}.ffn", contigs_base));
        if !protein_fasta.is_file() {
            return Err(PipelineError::missing_path("Protein FASTA", &protein_fasta));
        }
        if !gene_fasta.is_file() {
            return Err(PipelineError::missing_path("Gene FASTA", &gene_fasta));
        }

        let samples = resolve_samples(&config.sample_alignment_paths)?;

        let output = root.join("output");
        fs::create_dir_all(&output).map_err(|e| {
            PipelineError::config(format!("cannot create {}: {}", output.display(), e))
        })?;

        Ok(Self {
            root,
            temps,
            output,
            contigs_base,
            protein_fasta,
            gene_fasta,
            samples,
        })
    }

    /// Exclusive scratch directory of one category.
    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.temps.join(category)
    }

    /// Motif-search hit table the external searcher leaves for a category.
    pub fn hit_table(&self, category: &str) -> PathBuf {
        self.category_dir(category)
            .join(format!("{}_{}_HMMER.out", self.contigs_base, category))
    }

    pub fn sample_table(&self, sample_id: &str) -> PathBuf {
        self.output.join(format!("{}.tsv", sample_id))
    }

    pub fn summary_table(&self) -> PathBuf {
        self.output.join("abundance_summary.tsv")
    }

    pub fn run_report(&self) -> PathBuf {
        self.output.join("run_summary.json")
    }

    pub fn exported_hits(&self, category: &str) -> PathBuf {
        self.output.join(format!("{}_hits.faa", category))
    }
}

/// Paths inside a category's scratch directory.
#[derive(Debug, Clone)]
pub struct CategoryPaths {
    pub dir: PathBuf,
    pub hit_table: PathBuf,
    pub hit_proteins: PathBuf,
    pub hit_genes: PathBuf,
    pub corrected_genes: PathBuf,
    pub intervals: PathBuf,
}

impl CategoryPaths {
    pub fn new(layout: &WorkspaceLayout, category: &str) -> Self {
        let dir = layout.category_dir(category);
        let stem = format!("{}_{}", layout.contigs_base, category);
        Self {
            hit_table: layout.hit_table(category),
            hit_proteins: dir.join(format!("{}_hits.faa", stem)),
            hit_genes: dir.join(format!("{}_hits.ffn", stem)),
            corrected_genes: dir.join(format!("{}_hits-corrected.ffn", stem)),
            intervals: dir.join(format!("{}.saf", stem)),
            dir,
        }
    }

    /// Output prefix handed to the counter for one sample.
    pub fn counts_prefix(&self, category: &str, sample_id: &str) -> PathBuf {
        self.dir.join(format!("{}_{}_counts.out", category, sample_id))
    }

    pub fn counter_log(&self, sample_id: &str) -> PathBuf {
        self.dir.join(format!("{}_featureCounts.log", sample_id))
    }

    pub fn gene_abundance(&self, sample_id: &str) -> PathBuf {
        self.dir.join(format!("{}_gene_abundance.tsv", sample_id))
    }
}

fn resolve_samples(paths: &[PathBuf]) -> Result<Vec<Sample>, PipelineError> {
    if paths.is_empty() {
        return Err(PipelineError::config("no alignment files given"));
    }

    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut samples = Vec::with_capacity(paths.len());

    for path in paths {
        if !path.is_file() {
            return Err(PipelineError::missing_path("Alignment file", path));
        }
        let id = file_base(path);
        if id.is_empty() {
            return Err(PipelineError::config(format!(
                "cannot derive a sample id from {}",
                path.display()
            )));
        }
        if !seen.insert(id.clone()) {
            return Err(PipelineError::config(format!(
                "duplicate sample id '{}' ({})",
                id,
                path.display()
            )));
        }
        samples.push(Sample {
            id,
            alignment: path.clone(),
        });
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategorySelector;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::write(path, ">x\nA\n").unwrap();
    }

    fn workspace() -> (TempDir, RunConfig) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("temps")).unwrap();
        touch(&root.join("contigs.fa"));
        touch(&root.join("temps/contigs.faa"));
        touch(&root.join("temps/contigs.ffn"));
        touch(&root.join("S1.sorted.bam"));
        touch(&root.join("S2.bam"));

        let config = RunConfig::new(
            root,
            root.join("contigs.fa"),
            vec![root.join("S1.sorted.bam"), root.join("S2.bam")],
            CategorySelector::All,
        );
        (dir, config)
    }

    #[test]
    fn test_file_base() {
        assert_eq!(file_base(Path::new("/a/contigs-fixed.fa.gz")), "contigs-fixed");
        assert_eq!(file_base(Path::new("GC1.sorted.bam")), "GC1");
    }

    #[test]
    fn test_resolve_layout() {
        let (dir, config) = workspace();
        let layout = WorkspaceLayout::resolve(&config).unwrap();

        assert_eq!(layout.contigs_base, "contigs");
        assert_eq!(layout.samples.len(), 2);
        assert_eq!(layout.samples[0].id, "S1");
        assert!(dir.path().join("output").is_dir());
        assert_eq!(
            layout.hit_table("pet"),
            dir.path().join("temps/pet/contigs_pet_HMMER.out")
        );
    }

    #[test]
    fn test_missing_gene_fasta_fails_fast() {
        let (dir, config) = workspace();
        fs::remove_file(dir.path().join("temps/contigs.ffn")).unwrap();

        let err = WorkspaceLayout::resolve(&config).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Gene FASTA"));
    }

    #[test]
    fn test_missing_alignment_fails_fast() {
        let (dir, mut config) = workspace();
        config.sample_alignment_paths.push(dir.path().join("absent.bam"));
        assert!(WorkspaceLayout::resolve(&config).is_err());
    }

    #[test]
    fn test_duplicate_sample_ids_rejected() {
        let (dir, mut config) = workspace();
        touch(&dir.path().join("S2.other.bam"));
        config.sample_alignment_paths.push(dir.path().join("S2.other.bam"));

        let err = WorkspaceLayout::resolve(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate sample id"));
    }

    #[test]
    fn test_category_paths_stay_in_category_dir() {
        let (_dir, config) = workspace();
        let layout = WorkspaceLayout::resolve(&config).unwrap();
        let paths = CategoryPaths::new(&layout, "nylon");

        for p in [&paths.hit_proteins, &paths.hit_genes, &paths.corrected_genes, &paths.intervals] {
            assert!(p.starts_with(&paths.dir));
        }
        assert!(paths.counts_prefix("nylon", "S1").starts_with(&paths.dir));
    }
}
