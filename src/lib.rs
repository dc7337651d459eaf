//! plasticenz - Plastic-degrading enzyme abundance quantification
//!
//! Takes gene predictions and motif-search hit tables for a set of
//! metagenomic contigs and turns per-sample read counts into normalized
//! abundance (RPKM, proportion of counted reads, score dispersion) per
//! enzyme/plastic category per sample.
//!
//! # Modules
//! - `seqio`: FASTA I/O with gzip support
//! - `config`: Run configuration and external program lookup
//! - `error`: Failure taxonomy (fatal vs. recovered)
//! - `workspace`: Directory layout and input validation
//! - `catalog`: Category enumeration and score thresholds
//! - `hits`: Hit table parsing and hit sequence extraction
//! - `coords`: Strand correction and SAF interval tables
//! - `counting`: featureCounts invocation and output parsing
//! - `abundance`: RPKM, proportion and score statistics
//! - `tables`: Per-sample and run-wide output tables
//! - `pipeline`: Per-category state machine, worker pool and run report

pub mod seqio;
pub mod config;
pub mod error;
pub mod workspace;
pub mod catalog;
pub mod hits;
pub mod coords;
pub mod counting;
pub mod abundance;
pub mod tables;
pub mod pipeline;
