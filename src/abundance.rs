//! Abundance reduction
//!
//! Turns a counter summary, its per-gene counts and the category's hit
//! scores into one [`AbundanceRecord`] per (sample, category).
//!
//! # Metrics
//! - `rpk(gene)    = reads / (length / 1000)`, 0 when length is 0
//! - `rpkm_total   = Σ rpk / (total_reads / 1e6)`, 0 when total_reads is 0
//! - `proportion   = reads_mapped / total_reads`, 0 when total_reads is 0
//! - score mean / sample std / standard error over the hit scores; std and
//!   sem are not available below two observations
//!
//! `total_reads` is the sum of every tagged summary line (assigned and
//! unassigned), not sequencing depth.

use crate::counting::{CountSummary, FeatureCount};

/// Marker written wherever a statistic is undefined.
pub const NOT_AVAILABLE: &str = "NA";

/// Significant digits used for reported proportions.
pub const PROPORTION_PRECISION: usize = 4;

// ============================================================================
// Score Statistics
// ============================================================================

/// Location and dispersion of a category's detection scores.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub sem: Option<f64>,
}

impl ScoreStats {
    pub fn from_scores(scores: &[f64]) -> Self {
        let n = scores.len();
        let mean = mean(scores);
        let std = sample_std(scores);
        let sem = std.map(|s| s / (n as f64).sqrt());
        Self { count: n, mean, std, sem }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator); `None` below two values.
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

// ============================================================================
// Normalization
// ============================================================================

/// Reads per kilobase of feature length.
pub fn reads_per_kb(reads: u64, length: u64) -> f64 {
    if length == 0 {
        return 0.0;
    }
    reads as f64 / (length as f64 / 1000.0)
}

/// Converts a per-kilobase value to per-million-reads.
fn per_million(rpk: f64, total_reads: u64) -> f64 {
    if total_reads == 0 {
        return 0.0;
    }
    rpk / (total_reads as f64 / 1e6)
}

/// Category-level RPKM: the summed per-gene rpk scaled by total reads.
pub fn total_rpkm(features: &[FeatureCount], total_reads: u64) -> f64 {
    let total_rpk: f64 = features.iter().map(|f| reads_per_kb(f.reads, f.length)).sum();
    per_million(total_rpk, total_reads)
}

/// Fraction of counted reads that were assigned; 0 when nothing was counted.
pub fn proportion(reads_mapped: u64, total_reads: u64) -> f64 {
    if total_reads == 0 {
        return 0.0;
    }
    reads_mapped as f64 / total_reads as f64
}

// ============================================================================
// Records
// ============================================================================

/// Normalized abundance of one category in one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceRecord {
    pub sample_id: String,
    pub category: String,
    pub rpkm: f64,
    pub mean_score: Option<f64>,
    pub score_std: Option<f64>,
    pub score_sem: Option<f64>,
    pub reads_mapped: u64,
    pub total_reads: u64,
    pub proportion: f64,
}

impl AbundanceRecord {
    /// Reduces one counter run into a record.
    pub fn reduce(
        sample_id: &str,
        category: &str,
        summary: &CountSummary,
        features: &[FeatureCount],
        scores: &ScoreStats,
    ) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            category: category.to_string(),
            rpkm: total_rpkm(features, summary.total_reads),
            mean_score: scores.mean,
            score_std: scores.std,
            score_sem: scores.sem,
            reads_mapped: summary.reads_mapped,
            total_reads: summary.total_reads,
            proportion: proportion(summary.reads_mapped, summary.total_reads),
        }
    }

    /// Record for a sample that contributed no counts.
    pub fn empty(sample_id: &str, category: &str, scores: &ScoreStats) -> Self {
        Self::reduce(sample_id, category, &CountSummary::default(), &[], scores)
    }

    /// Proportion in fixed scientific notation, e.g. `8.0000e-01`.
    pub fn proportion_display(&self) -> String {
        format_scientific(self.proportion, PROPORTION_PRECISION)
    }
}

/// Per-gene abundance within one (category, sample) run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneAbundance {
    pub gene_id: String,
    pub length: u64,
    pub reads: u64,
    pub rpkm: f64,
    /// Standardized rpkm across the category's genes in this sample.
    pub z_score: Option<f64>,
}

/// Per-gene rpkm and z-scores.
///
/// z-scores are not available with fewer than two genes or when every gene
/// has the same rpkm.
pub fn gene_abundances(features: &[FeatureCount], total_reads: u64) -> Vec<GeneAbundance> {
    let rpkms: Vec<f64> = features
        .iter()
        .map(|f| per_million(reads_per_kb(f.reads, f.length), total_reads))
        .collect();

    let center = mean(&rpkms);
    let spread = sample_std(&rpkms).filter(|s| *s > 0.0);

    features
        .iter()
        .zip(rpkms)
        .map(|(f, rpkm)| GeneAbundance {
            gene_id: f.gene_id.clone(),
            length: f.length,
            reads: f.reads,
            rpkm,
            z_score: match (center, spread) {
                (Some(m), Some(s)) => Some((rpkm - m) / s),
                _ => None,
            },
        })
        .collect()
}

// ============================================================================
// Formatting
// ============================================================================

/// Formats an optional statistic, using [`NOT_AVAILABLE`] for `None`.
pub fn fmt_optional(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.4}", v),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Scientific notation with a signed, two-digit exponent.
pub fn format_scientific(value: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, value);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => raw,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: &str, length: u64, reads: u64) -> FeatureCount {
        FeatureCount { gene_id: id.into(), length, reads }
    }

    #[test]
    fn test_rpkm_reference_case() {
        let features = vec![feature("g1", 1000, 50), feature("g2", 2000, 0)];
        let rpkm = total_rpkm(&features, 1000);
        assert!((rpkm - 50000.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_length_gene_contributes_nothing() {
        let features = vec![feature("g1", 0, 500), feature("g2", 1000, 10)];
        assert_eq!(reads_per_kb(500, 0), 0.0);
        assert!((total_rpkm(&features, 1_000_000) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_total_reads() {
        assert_eq!(proportion(0, 0), 0.0);
        assert_eq!(total_rpkm(&[feature("g1", 1000, 5)], 0), 0.0);
    }

    #[test]
    fn test_reduce_summary() {
        let summary = CountSummary { reads_mapped: 80, total_reads: 100 };
        let record = AbundanceRecord::reduce("S1", "pet", &summary, &[], &ScoreStats::default());

        assert_eq!(record.reads_mapped, 80);
        assert_eq!(record.total_reads, 100);
        assert!((record.proportion - 0.80).abs() < 1e-12);
        assert_eq!(record.proportion_display(), "8.0000e-01");
    }

    #[test]
    fn test_proportion_within_unit_interval() {
        for (mapped, total) in [(0u64, 10u64), (3, 10), (10, 10), (1, 1_000_000)] {
            let p = proportion(mapped, total);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_score_stats_two_observations() {
        let stats = ScoreStats::from_scores(&[10.0, 12.0]);
        assert_eq!(stats.mean, Some(11.0));
        let std = stats.std.unwrap();
        assert!((std - 2f64.sqrt()).abs() < 1e-12);
        assert!((stats.sem.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_score_stats_single_observation_not_available() {
        let stats = ScoreStats::from_scores(&[10.0]);
        assert_eq!(stats.mean, Some(10.0));
        assert_eq!(stats.std, None);
        assert_eq!(stats.sem, None);
        assert_eq!(fmt_optional(stats.std), "NA");
    }

    #[test]
    fn test_empty_record() {
        let record = AbundanceRecord::empty("S1", "nylon", &ScoreStats::from_scores(&[]));
        assert_eq!(record.reads_mapped, 0);
        assert_eq!(record.rpkm, 0.0);
        assert_eq!(record.proportion, 0.0);
        assert_eq!(record.mean_score, None);
    }

    #[test]
    fn test_gene_z_scores() {
        let features = vec![feature("g1", 1000, 10), feature("g2", 1000, 30)];
        let genes = gene_abundances(&features, 1_000_000);
        assert!((genes[0].rpkm - 10.0).abs() < 1e-9);
        let z0 = genes[0].z_score.unwrap();
        let z1 = genes[1].z_score.unwrap();
        assert!((z0 + z1).abs() < 1e-12);
        assert!(z1 > 0.0);

        let flat = gene_abundances(&[feature("g1", 1000, 5), feature("g2", 1000, 5)], 100);
        assert!(flat.iter().all(|g| g.z_score.is_none()));
    }

    #[test]
    fn test_format_scientific() {
        assert_eq!(format_scientific(0.0, 4), "0.0000e+00");
        assert_eq!(format_scientific(1.0, 4), "1.0000e+00");
        assert_eq!(format_scientific(0.000123, 2), "1.23e-04");
    }
}
