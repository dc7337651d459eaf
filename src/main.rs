use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use plasticenz::catalog::fetch_motif;
use plasticenz::config::{CategorySelector, RunConfig, ToolPaths, DEFAULT_MIN_SEQ_LEN, DEFAULT_POLL_MS};
use plasticenz::counting::FeatureCountsRunner;
use plasticenz::pipeline::{CategoryState, Pipeline, RunReport};

fn parse_min_length(s: &str) -> Result<usize, String> {
    let val: usize = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val == 0 {
        Err("minimum length must be at least 1".to_string())
    } else {
        Ok(val)
    }
}

#[derive(Parser)]
#[command(name = "plasticenz")]
#[command(version)]
#[command(about = "Abundance of plastic-degrading enzymes across metagenomic samples")]
#[command(long_about = r#"
plasticenz - Plastic-degrading enzyme abundance quantification

Quantifies candidate plastic-degrading enzymes per category and sample:
  1. Selects predicted genes with motif hits above the category threshold
  2. Puts hit genes in sense orientation and writes a SAF interval table
  3. Counts reads per hit gene in every sample with featureCounts
  4. Reduces counts to RPKM, proportion and detection-score statistics

WORKFLOW:
  hit table -> hit extraction -> coordinate correction -> featureCounts -> abundance

WORKSPACE (-o):
  temps/<contigs>.faa, temps/<contigs>.ffn      Gene predictions (required)
  temps/<category>/<contigs>_<category>_HMMER.out   Motif-search hits
  motifs/<category>.hmm, motifs/bitscores.txt   Reference motifs (see -d)

OUTPUT FILES:
  output/<sample>.tsv            One row per category
    Columns: plastic name, reads mapped, total reads, proportion, rpkm
  output/abundance_summary.tsv   Every record with score statistics
  output/run_summary.json        Category states and skipped samples

EXAMPLES:
  # All categories, parallel
  plasticenz -o work/ -i contigs.fa -m S1.bam,S2.bam -c all -p

  # Selected categories
  plasticenz -o work/ -i contigs.fa -m S1.bam -c pet,nylon

  # Copy one reference motif into the workspace
  plasticenz -o work/ --fetch-motif pet
"#)]
struct Args {
    #[arg(short = 'i', long, value_name = "FILE", help_heading = "Input")]
    contigs: Option<PathBuf>,

    #[arg(short = 'm', long, value_name = "FILE(S)", help_heading = "Input")]
    mappings: Option<String>,

    #[arg(short = 'c', long, value_name = "LIST", default_value = "all", help_heading = "Categories")]
    plastic: String,

    #[arg(short = 'd', long, value_name = "DIR", help_heading = "Categories")]
    motifs: Option<PathBuf>,

    #[arg(long = "fetch-motif", value_name = "NAME", help_heading = "Categories")]
    fetch_motif: Option<String>,

    #[arg(long = "min-length", value_name = "AA", default_value_t = DEFAULT_MIN_SEQ_LEN,
          value_parser = parse_min_length, help_heading = "Categories")]
    min_length: usize,

    #[arg(short = 'o', long, value_name = "DIR", default_value = ".", help_heading = "Output")]
    output: PathBuf,

    #[arg(short = 'f', long, help_heading = "Output")]
    force: bool,

    #[arg(long = "export-hits", help_heading = "Output")]
    export_hits: bool,

    #[arg(short = 'v', long, help_heading = "Output")]
    verbose: bool,

    #[arg(short = 'p', long, help_heading = "Runtime")]
    parallel: bool,

    #[arg(short = 't', long, value_name = "NUM", default_value = "0", help_heading = "Runtime")]
    threads: usize,

    #[arg(long = "poll-ms", value_name = "MS", default_value_t = DEFAULT_POLL_MS, help_heading = "Runtime")]
    poll_ms: u64,

    #[arg(long = "counter-timeout", value_name = "SECS", default_value = "0", help_heading = "Runtime")]
    counter_timeout: u64,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn build_config(args: &Args, motif_dir: PathBuf) -> Result<RunConfig> {
    let contigs = args
        .contigs
        .clone()
        .context("--contigs is required for analysis mode")?;
    let mappings = args
        .mappings
        .as_deref()
        .context("--mappings is required for analysis mode")?;

    let mut config = RunConfig::new(
        &args.output,
        contigs,
        RunConfig::parse_alignment_list(mappings),
        CategorySelector::parse(&args.plastic)?,
    );
    config.parallel = args.parallel;
    config.threads = args.threads;
    config.force_overwrite = args.force;
    config.motif_dir = motif_dir;
    config.min_seq_len = args.min_length;
    config.poll_interval = Duration::from_millis(args.poll_ms.max(1));
    config.counter_timeout = (args.counter_timeout > 0).then(|| Duration::from_secs(args.counter_timeout));
    config.export_hits = args.export_hits;

    Ok(config)
}

fn handle_fetch_motif(name: &str, motif_dir: &Path, dest: &Path) -> Result<()> {
    let (path, threshold) = fetch_motif(name, motif_dir, dest)?;
    eprintln!("Copied motif: {}", path.display());
    match threshold {
        Some(t) => println!("{}\t{}", name.to_lowercase(), t),
        None => eprintln!("No threshold for '{}' in {}", name, motif_dir.display()),
    }
    Ok(())
}

fn print_skipped(report: &RunReport) {
    if report.is_complete() {
        return;
    }

    eprintln!("\nSkipped:");
    for outcome in report.failed() {
        eprintln!("  {}", outcome.cause.as_deref().unwrap_or("unknown cause"));
    }
    for skipped in &report.skipped_samples {
        eprintln!("  {}", skipped.cause);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let start_time = Instant::now();

    let motif_dir = args.motifs.clone().unwrap_or_else(|| args.output.join("motifs"));

    if let Some(name) = &args.fetch_motif {
        return handle_fetch_motif(name, &motif_dir, &args.output);
    }

    let config = build_config(&args, motif_dir)?;
    let tools = ToolPaths::locate()?;

    if args.verbose {
        eprintln!("Found featureCounts: {}", tools.feature_counts.display());
    }

    let counter = FeatureCountsRunner::new(&tools.feature_counts, config.poll_interval, config.counter_timeout);
    let pipeline = Pipeline::new(&config, Box::new(counter))?;

    eprintln!("============================================================");
    eprintln!("  plasticenz");
    eprintln!("============================================================");
    eprintln!("  Workspace:  {}", pipeline.layout().root.display());
    eprintln!("  Contigs:    {}", config.contigs_path.display());
    eprintln!("  Samples:    {}", pipeline.layout().samples.len());
    eprintln!("  Categories: {}", pipeline.catalog().names().join(", "));
    eprintln!("  Workers:    {}", config.worker_count());
    eprintln!("============================================================");

    if args.verbose {
        for category in pipeline.catalog().categories() {
            let threshold = category
                .threshold
                .map(|t| t.to_string())
                .unwrap_or_else(|| "none".to_string());
            eprintln!("  {:<16} {} (threshold {})", category.name, category.motif.display(), threshold);
        }
    }

    let report = pipeline.run()?;

    let done = report
        .outcomes
        .iter()
        .filter(|o| o.state == CategoryState::Done)
        .count();
    eprintln!(
        "\n{}/{} categories done, {} record(s) written to {}",
        done,
        report.outcomes.len(),
        report.record_count,
        pipeline.layout().output.display()
    );
    print_skipped(&report);

    if args.verbose {
        eprintln!("\nTotal time: {:.1}s", start_time.elapsed().as_secs_f64());
    }

    Ok(())
}
