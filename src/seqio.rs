//! Sequence I/O Module
//!
//! Reading and writing of the FASTA files exchanged with the gene predictor
//! and the downstream counting step. Gzip-compressed inputs are detected by
//! their `.gz` extension and decompressed on the fly.
//!
//! # Examples
//! ```no_run
//! use plasticenz::seqio::FastaReader;
//!
//! let mut reader = FastaReader::open("genes.ffn").unwrap();
//! while let Some(record) = reader.read_next().unwrap() {
//!     println!("{}: {} bp", record.name, record.seq.len());
//! }
//! ```

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

// ============================================================================
// FASTA Format
// ============================================================================

/// A FASTA record.
///
/// `name` is the text after '>' up to the first whitespace, `header` keeps
/// the complete description line. The gene predictor stores coordinates in
/// the description, so both are needed.
#[derive(Debug, Clone, PartialEq)]
pub struct FastaRecord {
    /// Sequence identifier extracted from the header line.
    pub name: String,
    /// Full header line without the leading '>'.
    pub header: String,
    /// Residues, concatenated from all sequence lines.
    pub seq: String,
}

impl FastaRecord {
    pub fn new(header: &str, seq: &str) -> Self {
        Self {
            name: header_name(header).to_string(),
            header: header.to_string(),
            seq: seq.to_string(),
        }
    }
}

fn header_name(header: &str) -> &str {
    header.split_whitespace().next().unwrap_or("")
}

/// Sequential reader for FASTA files, plain or gzipped.
///
/// Reads one record at a time and handles multi-line sequences.
pub struct FastaReader {
    reader: Box<dyn BufRead + Send>,
    line_buf: String,
    current_header: Option<String>,
}

impl FastaReader {
    /// Opens a FASTA file for reading.
    ///
    /// Files with a `.gz` extension are read through a gzip decoder.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open FASTA: {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let reader: Box<dyn BufRead + Send> = if ext == "gz" {
            Box::new(BufReader::with_capacity(1024 * 1024, MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::with_capacity(1024 * 1024, file))
        };

        Self::from_reader(reader)
    }

    /// Wraps any buffered source. Used for in-memory input in tests.
    pub fn from_reader(reader: Box<dyn BufRead + Send>) -> Result<Self> {
        let mut reader = Self {
            reader,
            line_buf: String::with_capacity(256),
            current_header: None,
        };

        // Skip anything before the first header line
        loop {
            reader.line_buf.clear();
            if reader.reader.read_line(&mut reader.line_buf)? == 0 {
                break;
            }
            if let Some(header) = reader.line_buf.strip_prefix('>') {
                reader.current_header = Some(header.trim_end().to_string());
                break;
            }
        }

        Ok(reader)
    }

    /// Reads the next FASTA record.
    ///
    /// # Returns
    /// - `Ok(Some(record))` - Successfully read a record
    /// - `Ok(None)` - End of file reached
    /// - `Err(e)` - I/O error occurred
    pub fn read_next(&mut self) -> Result<Option<FastaRecord>> {
        let header = match self.current_header.take() {
            Some(h) => h,
            None => return Ok(None),
        };

        let mut seq = String::with_capacity(2048);

        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                break;
            }

            if let Some(next) = self.line_buf.strip_prefix('>') {
                self.current_header = Some(next.trim_end().to_string());
                break;
            }
            seq.push_str(self.line_buf.trim());
        }

        Ok(Some(FastaRecord {
            name: header_name(&header).to_string(),
            header,
            seq,
        }))
    }
}

impl Iterator for FastaReader {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Buffered FASTA writer. Sequences are written on a single line.
pub struct FastaWriter<W: Write> {
    writer: BufWriter<W>,
}

impl FastaWriter<File> {
    /// Creates (or truncates) a FASTA file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create FASTA: {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl<W: Write> FastaWriter<W> {
    /// Writes a record using its full header.
    pub fn write_record(&mut self, record: &FastaRecord) -> Result<()> {
        writeln!(self.writer, ">{}", record.header)?;
        writeln!(self.writer, "{}", record.seq)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads every record of a FASTA file into memory.
pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<FastaRecord>> {
    FastaReader::open(path)?.collect()
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Complement of a single IUPAC nucleotide code, preserving case.
/// Characters outside the alphabet are returned unchanged.
fn complement(c: char) -> char {
    match c {
        'A' => 'T',
        'T' => 'A',
        'G' => 'C',
        'C' => 'G',
        'U' => 'A',
        'R' => 'Y',
        'Y' => 'R',
        'K' => 'M',
        'M' => 'K',
        'B' => 'V',
        'V' => 'B',
        'D' => 'H',
        'H' => 'D',
        'a' => 't',
        't' => 'a',
        'g' => 'c',
        'c' => 'g',
        'u' => 'a',
        'r' => 'y',
        'y' => 'r',
        'k' => 'm',
        'm' => 'k',
        'b' => 'v',
        'v' => 'b',
        'd' => 'h',
        'h' => 'd',
        other => other,
    }
}

/// Computes the reverse complement of a DNA sequence.
pub fn reverse_complement(seq: &str) -> String {
    seq.chars().rev().map(complement).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader_for(text: &'static str) -> FastaReader {
        FastaReader::from_reader(Box::new(Cursor::new(text.as_bytes()))).unwrap()
    }

    #[test]
    fn test_read_multiline_records() {
        let records: Vec<FastaRecord> = reader_for(">g1 # 1 # 9 # 1 # x\nATG\nAAA\nTAA\n>g2\nATGC\n")
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "g1");
        assert_eq!(records[0].header, "g1 # 1 # 9 # 1 # x");
        assert_eq!(records[0].seq, "ATGAAATAA");
        assert_eq!(records[1].name, "g2");
        assert_eq!(records[1].seq, "ATGC");
    }

    #[test]
    fn test_empty_input() {
        let mut reader = reader_for("");
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("ATGC"), "GCAT");
        assert_eq!(reverse_complement("AAAA"), "TTTT");
        assert_eq!(reverse_complement("acgN"), "Ncgt");
        assert_eq!(reverse_complement(""), "");
    }

    #[test]
    fn test_reverse_complement_twice_is_identity() {
        let seq = "ATGCRYKMBVDHNacgtrykmbvdhn-*";
        assert_eq!(reverse_complement(&reverse_complement(seq)), seq);
    }

    #[test]
    fn test_write_then_read_keeps_full_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fa");

        let mut writer = FastaWriter::create(&path).unwrap();
        writer.write_record(&FastaRecord::new("c1_1 # 3 # 8 # -1 # ID=1_1", "ATGAAA")).unwrap();
        writer.finish().unwrap();

        let records = read_all(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "c1_1");
        assert_eq!(records[0].header, "c1_1 # 3 # 8 # -1 # ID=1_1");
    }

    #[test]
    fn test_read_gzipped_fasta() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genes.faa.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b">p1\nMKLV\n").unwrap();
        enc.finish().unwrap();

        let records = read_all(&path).unwrap();
        assert_eq!(records, vec![FastaRecord::new("p1", "MKLV")]);
    }
}
