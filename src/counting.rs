//! Read counting
//!
//! Runs the external read counter for one (category, sample) pair and parses
//! its two outputs.
//!
//! # Summary (`<prefix>.summary`)
//! ```text
//! Status                  S1.bam
//! Assigned                80
//! Unassigned_Ambiguity    20
//! ```
//!
//! # Per-feature table (`<prefix>`)
//! ```text
//! # Program:featureCounts v2.0.3; Command: ...
//! Geneid  Chr  Start  End  Strand  Length  S1.bam
//! c1_1    c1   1      999  +       1000    50
//! ```
//! The first two lines are skipped; columns 6 and 7 are length and reads.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, warn};

// ============================================================================
// Output Parsing
// ============================================================================

/// Tagged totals from the counter summary.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CountSummary {
    /// Value on the `Assigned` line.
    pub reads_mapped: u64,
    /// Sum over every `Assigned`/`Unassigned*` line.
    pub total_reads: u64,
}

impl CountSummary {
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut summary = CountSummary::default();

        for line in reader.lines() {
            let line = line?;
            let is_assigned = line.starts_with("Assigned");
            if !is_assigned && !line.starts_with("Unassigned") {
                continue;
            }

            let value = line
                .split('\t')
                .nth(1)
                .ok_or_else(|| anyhow::anyhow!("Summary line without count: '{}'", line))?;
            let count: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid count in summary line '{}'", line))?;

            if is_assigned {
                summary.reads_mapped = count;
            }
            summary.total_reads += count;
        }

        Ok(summary)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open count summary: {}", path.display()))?;
        Self::parse(BufReader::new(file))
    }
}

/// Mapped-read count and length of one gene.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCount {
    pub gene_id: String,
    pub length: u64,
    pub reads: u64,
}

impl FeatureCount {
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            anyhow::bail!("Invalid feature line: expected at least 7 columns, got {}", fields.len());
        }

        Ok(Self {
            gene_id: fields[0].to_string(),
            length: fields[5]
                .parse()
                .with_context(|| format!("Invalid feature length '{}'", fields[5]))?,
            reads: fields[6]
                .parse()
                .with_context(|| format!("Invalid read count '{}'", fields[6]))?,
        })
    }
}

/// Parses a per-feature table, skipping its two header lines.
pub fn parse_feature_counts<R: BufRead>(reader: R) -> Result<Vec<FeatureCount>> {
    let mut features = Vec::new();

    for line in reader.lines().skip(2) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        features.push(FeatureCount::parse_line(&line)?);
    }

    Ok(features)
}

pub fn load_feature_counts(path: &Path) -> Result<Vec<FeatureCount>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open feature counts: {}", path.display()))?;
    parse_feature_counts(BufReader::new(file))
}

// ============================================================================
// Counter Invocation
// ============================================================================

/// Files a counter run leaves behind.
#[derive(Debug, Clone)]
pub struct CountOutputs {
    pub features: PathBuf,
    pub summary: PathBuf,
    pub log: PathBuf,
}

impl CountOutputs {
    pub fn for_prefix(prefix: &Path, log: &Path) -> Self {
        let mut summary = prefix.as_os_str().to_owned();
        summary.push(".summary");
        Self {
            features: prefix.to_path_buf(),
            summary: PathBuf::from(summary),
            log: log.to_path_buf(),
        }
    }

    /// Parses both outputs.
    ///
    /// A missing or zero-byte summary means the counter produced nothing
    /// usable for this sample.
    pub fn load(&self) -> Result<(CountSummary, Vec<FeatureCount>)> {
        let size = fs::metadata(&self.summary).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            anyhow::bail!(
                "no count summary produced ({}); see {}",
                self.summary.display(),
                self.log.display()
            );
        }

        let summary = CountSummary::load(&self.summary)?;
        let features = load_feature_counts(&self.features)?;
        Ok((summary, features))
    }
}

/// Counts reads from one alignment file over an interval table.
///
/// Implementations must leave their outputs at the returned paths; the
/// caller treats absent or empty outputs as "no counts".
pub trait ReadCounter: Send + Sync {
    fn count(&self, intervals: &Path, alignment: &Path, out_prefix: &Path, log: &Path) -> Result<CountOutputs>;
}

/// `featureCounts` run as a child process.
#[derive(Debug, Clone)]
pub struct FeatureCountsRunner {
    executable: PathBuf,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl FeatureCountsRunner {
    pub fn new(executable: &Path, poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            executable: executable.to_path_buf(),
            poll_interval,
            timeout,
        }
    }
}

impl ReadCounter for FeatureCountsRunner {
    fn count(&self, intervals: &Path, alignment: &Path, out_prefix: &Path, log: &Path) -> Result<CountOutputs> {
        let outputs = CountOutputs::for_prefix(out_prefix, log);

        // Stale outputs from an earlier run must not be mistaken for fresh ones
        let _ = fs::remove_file(&outputs.summary);
        let _ = fs::remove_file(&outputs.features);

        let stdout = File::create(log)
            .with_context(|| format!("Failed to create counter log: {}", log.display()))?;
        let stderr = stdout.try_clone()?;

        debug!(
            "{} -a {} -F SAF -o {} {}",
            self.executable.display(),
            intervals.display(),
            out_prefix.display(),
            alignment.display()
        );

        let mut child = Command::new(&self.executable)
            .arg("-a")
            .arg(intervals)
            .args(["-F", "SAF", "-o"])
            .arg(out_prefix)
            .arg(alignment)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .with_context(|| format!("Failed to run {}", self.executable.display()))?;

        let status = wait_with_poll(&mut child, self.poll_interval, self.timeout)?;
        if !status.success() {
            warn!(
                "featureCounts exited with {:?} for {}; log: {}",
                status.code(),
                alignment.display(),
                log.display()
            );
        }

        Ok(outputs)
    }
}

/// Blocks until `child` exits, checking every `poll_interval`.
///
/// With a timeout the child is killed once it is exceeded.
pub fn wait_with_poll(child: &mut Child, poll_interval: Duration, timeout: Option<Duration>) -> Result<ExitStatus> {
    let started = Instant::now();

    loop {
        if let Some(status) = child.try_wait().context("Failed to poll child process")? {
            return Ok(status);
        }

        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                let _ = child.kill();
                let _ = child.wait();
                anyhow::bail!("process exceeded {:.1}s and was killed", limit.as_secs_f64());
            }
        }

        std::thread::sleep(poll_interval);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_summary() {
        let text = "Status\tS1.bam\nAssigned\t80\nUnassigned_Ambiguity\t20\nUnassigned_NoFeatures\t0\n";
        let summary = CountSummary::parse(Cursor::new(text)).unwrap();
        assert_eq!(summary.reads_mapped, 80);
        assert_eq!(summary.total_reads, 100);
    }

    #[test]
    fn test_parse_summary_bad_count() {
        assert!(CountSummary::parse(Cursor::new("Assigned\tmany\n")).is_err());
        assert!(CountSummary::parse(Cursor::new("Assigned 80\n")).is_err());
    }

    #[test]
    fn test_parse_feature_counts_skips_header() {
        let text = "# Program:featureCounts v2.0.3\n\
                    Geneid\tChr\tStart\tEnd\tStrand\tLength\tS1.bam\n\
                    c1_1\tc1\t1\t1000\t+\t1000\t50\n\
                    c2_1\tc2\t1\t2000\t-\t2000\t0\n";
        let features = parse_feature_counts(Cursor::new(text)).unwrap();
        assert_eq!(
            features,
            vec![
                FeatureCount { gene_id: "c1_1".into(), length: 1000, reads: 50 },
                FeatureCount { gene_id: "c2_1".into(), length: 2000, reads: 0 },
            ]
        );
    }

    #[test]
    fn test_invalid_feature_line() {
        assert!(FeatureCount::parse_line("c1_1\tc1\t1").is_err());
    }

    #[test]
    fn test_summary_path_from_prefix() {
        let outputs = CountOutputs::for_prefix(Path::new("/t/pet_S1_counts.out"), Path::new("/t/S1.log"));
        assert_eq!(outputs.summary, PathBuf::from("/t/pet_S1_counts.out.summary"));
        assert_eq!(outputs.features, PathBuf::from("/t/pet_S1_counts.out"));
    }

    #[test]
    fn test_empty_summary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("pet_S1_counts.out");
        let outputs = CountOutputs::for_prefix(&prefix, &dir.path().join("S1.log"));
        assert!(outputs.load().is_err());

        fs::write(&outputs.summary, "").unwrap();
        assert!(outputs.load().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_poll() {
        let mut child = Command::new("true").spawn().unwrap();
        let status = wait_with_poll(&mut child, Duration::from_millis(5), None).unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_poll_timeout_kills_child() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let err = wait_with_poll(&mut child, Duration::from_millis(5), Some(Duration::from_millis(50)));
        assert!(err.is_err());
    }
}
