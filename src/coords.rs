//! Coordinate correction
//!
//! The gene predictor writes headers of the form
//! `<contig>_<n> # <start> # <end> # <strand> # <extra>`. This module turns
//! every hit gene into sense orientation, keeps the full header as the record
//! id, and derives the SAF interval table the read counter consumes.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::seqio::{reverse_complement, FastaReader, FastaRecord, FastaWriter};

pub const SAF_HEADER: &str = "GeneID\tChr\tStart\tEnd\tStrand";

/// Strand of a predicted gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    /// Parses the predictor's numeric strand (`1` / `-1`).
    pub fn from_field(value: &str) -> Result<Self> {
        match value.trim().parse::<i32>() {
            Ok(1) => Ok(Strand::Forward),
            Ok(-1) => Ok(Strand::Reverse),
            _ => anyhow::bail!("Invalid strand '{}': expected 1 or -1", value.trim()),
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

/// Positional fields parsed from a predictor header.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneHeader {
    pub gene_id: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
}

impl GeneHeader {
    /// Parses `<id> # <start> # <end> # <strand> [# ...]`.
    pub fn parse(header: &str) -> Result<Self> {
        let fields: Vec<&str> = header.split('#').map(str::trim).collect();
        if fields.len() < 4 {
            anyhow::bail!(
                "Malformed gene header '{}': expected '<id> # <start> # <end> # <strand>'",
                header
            );
        }

        let gene_id = fields[0].to_string();
        if gene_id.is_empty() {
            anyhow::bail!("Malformed gene header '{}': empty gene id", header);
        }
        let start: u64 = fields[1]
            .parse()
            .with_context(|| format!("Invalid start '{}' in header '{}'", fields[1], header))?;
        let end: u64 = fields[2]
            .parse()
            .with_context(|| format!("Invalid end '{}' in header '{}'", fields[2], header))?;
        if start > end {
            anyhow::bail!("Invalid coordinates in header '{}': start {} > end {}", header, start, end);
        }
        let strand = Strand::from_field(fields[3]).with_context(|| format!("In header '{}'", header))?;

        Ok(Self { gene_id, start, end, strand })
    }

    /// Contig id: the gene id without its trailing `_<ordinal>`.
    pub fn contig_id(&self) -> Result<&str> {
        match self.gene_id.rsplit_once('_') {
            Some((contig, _)) if !contig.is_empty() => Ok(contig),
            _ => anyhow::bail!("Cannot derive contig id from gene id '{}'", self.gene_id),
        }
    }
}

/// One row of the SAF interval table.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationInterval {
    pub gene_id: String,
    pub chr: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
}

impl AnnotationInterval {
    pub fn from_header(header: &str) -> Result<Self> {
        let parsed = GeneHeader::parse(header)?;
        Ok(Self {
            chr: parsed.contig_id()?.to_string(),
            gene_id: parsed.gene_id,
            start: parsed.start,
            end: parsed.end,
            strand: parsed.strand,
        })
    }
}

impl fmt::Display for AnnotationInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.gene_id,
            self.chr,
            self.start,
            self.end,
            self.strand.symbol()
        )
    }
}

/// Puts one predicted gene in sense orientation.
///
/// Reverse-strand sequences are reverse-complemented; the full header
/// becomes the record id so coordinates survive downstream.
pub fn correct_record(record: &FastaRecord) -> Result<FastaRecord> {
    let header = GeneHeader::parse(&record.header)?;
    let seq = match header.strand {
        Strand::Reverse => reverse_complement(&record.seq),
        Strand::Forward => record.seq.clone(),
    };

    Ok(FastaRecord {
        name: record.header.clone(),
        header: record.header.clone(),
        seq,
    })
}

/// Corrects every record of `input` into `output`. Returns the record count.
pub fn correct_fasta(input: &Path, output: &Path) -> Result<usize> {
    let mut writer = FastaWriter::create(output)?;
    let mut count = 0;

    for record in FastaReader::open(input)? {
        let corrected = correct_record(&record?)?;
        writer.write_record(&corrected)?;
        count += 1;
    }

    writer.finish()?;
    Ok(count)
}

/// Writes the SAF interval table for a corrected FASTA file.
pub fn write_interval_table(corrected: &Path, saf_path: &Path) -> Result<Vec<AnnotationInterval>> {
    let mut intervals = Vec::new();
    for record in FastaReader::open(corrected)? {
        intervals.push(AnnotationInterval::from_header(&record?.header)?);
    }

    let file = File::create(saf_path)
        .with_context(|| format!("Failed to create interval table: {}", saf_path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", SAF_HEADER)?;
    for interval in &intervals {
        writeln!(writer, "{}", interval)?;
    }
    writer.flush()?;

    Ok(intervals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqio::read_all;
    use std::fs;

    #[test]
    fn test_parse_header() {
        let h = GeneHeader::parse("k141_7_2 # 120 # 455 # -1 # ID=7_2;partial=00").unwrap();
        assert_eq!(h.gene_id, "k141_7_2");
        assert_eq!((h.start, h.end), (120, 455));
        assert_eq!(h.strand, Strand::Reverse);
        assert_eq!(h.contig_id().unwrap(), "k141_7");
    }

    #[test]
    fn test_malformed_headers() {
        assert!(GeneHeader::parse("k141_7_2").is_err());
        assert!(GeneHeader::parse("k141_7_2 # 1 # 9").is_err());
        assert!(GeneHeader::parse("k141_7_2 # a # 9 # 1").is_err());
        assert!(GeneHeader::parse("k141_7_2 # 1 # 9 # 0").is_err());
        assert!(GeneHeader::parse("k141_7_2 # 10 # 9 # 1").is_err());
    }

    #[test]
    fn test_forward_correction_is_idempotent() {
        let record = FastaRecord::new("c1_1 # 1 # 9 # 1 # x", "ATGAAATAA");
        let once = correct_record(&record).unwrap();
        let twice = correct_record(&once).unwrap();

        assert_eq!(once.seq, "ATGAAATAA");
        assert_eq!(twice.seq, once.seq);
        assert_eq!(once.name, "c1_1 # 1 # 9 # 1 # x");
    }

    #[test]
    fn test_reverse_correction() {
        let record = FastaRecord::new("c1_2 # 20 # 28 # -1 # x", "TTATTTCAT");
        let corrected = correct_record(&record).unwrap();
        assert_eq!(corrected.seq, "ATGAAATAA");
    }

    #[test]
    fn test_interval_display() {
        let interval = AnnotationInterval::from_header("NODE_1_len_900_3 # 5 # 98 # -1 # x").unwrap();
        assert_eq!(interval.chr, "NODE_1_len_900");
        assert_eq!(interval.to_string(), "NODE_1_len_900_3\tNODE_1_len_900\t5\t98\t-");
    }

    #[test]
    fn test_correct_and_write_interval_table() {
        let dir = tempfile::tempdir().unwrap();
        let hits = dir.path().join("hits.ffn");
        let corrected = dir.path().join("hits-corrected.ffn");
        let saf = dir.path().join("hits.saf");
        fs::write(
            &hits,
            ">c1_1 # 1 # 9 # 1 # ID=1_1\nATGAAATAA\n>c2_1 # 20 # 28 # -1 # ID=2_1\nTTATTTCAT\n",
        )
        .unwrap();

        assert_eq!(correct_fasta(&hits, &corrected).unwrap(), 2);
        let records = read_all(&corrected).unwrap();
        assert_eq!(records[1].seq, "ATGAAATAA");
        assert_eq!(records[1].header, "c2_1 # 20 # 28 # -1 # ID=2_1");

        let intervals = write_interval_table(&corrected, &saf).unwrap();
        assert_eq!(intervals.len(), 2);
        assert_eq!(
            fs::read_to_string(&saf).unwrap(),
            "GeneID\tChr\tStart\tEnd\tStrand\nc1_1\tc1\t1\t9\t+\nc2_1\tc2\t20\t28\t-\n"
        );
    }

    #[test]
    fn test_malformed_record_fails_correction() {
        let dir = tempfile::tempdir().unwrap();
        let hits = dir.path().join("hits.ffn");
        fs::write(&hits, ">c1_1 no coordinates\nATG\n").unwrap();
        assert!(correct_fasta(&hits, &dir.path().join("out.ffn")).is_err());
    }
}
