//! # vep-flatten
//!
//! Flattens VEP-annotated gnomAD and ClinVar VCF files into TSV tables and
//! summarizes loss-of-function variation per transcript.
//!
//! ```bash
//! # one row per variant with its canonical Ensembl transcripts
//! vep-flatten canonical gnomad.exomes.chr1.vcf.bgz -o tables/
//!
//! # one row per ClinVar variant and VEP transcript
//! vep-flatten clinvar clinvar_vep.vcf.gz -n clinvar
//!
//! # per-transcript gnomAD tables for several chromosomes, 4 files at a time
//! vep-flatten transcripts chr*.vcf.bgz -j 4 -o tables/
//!
//! # per-transcript LoF summary joined with constraint and expression
//! vep-flatten aggregate tables/chr*.tsv --constraint constraint.tsv \
//!     --expression expression.tsv -o summary.tsv
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{error, info};
use rayon::prelude::*;

use vep_flatten::aggregate_transcripts::{
    aggregate_tables, write_summaries, AggregateOptions, IdMatch,
};
use vep_flatten::error::VepFlatError;
use vep_flatten::reformat_vcf::{
    output_paths, reformat_vcf, CanonicalRows, ClinvarRows, ReformatStats, RowBuilder,
    TranscriptRows,
};
use vep_flatten::sequence_context::{
    context_bias, contexts_path, load_contexts, write_context_records, write_position_tests,
    ContextWindow, TranscriptSequences,
};

#[derive(Parser)]
#[command(
    name = "vep-flatten",
    version,
    about = "🧬 Flatten VEP-annotated gnomAD and ClinVar VCF files into TSV tables",
    long_about = "Extracts VEP transcript annotations from gnomAD and ClinVar VCF files (gzip or plain) into tab-separated tables, selects canonical Ensembl transcripts, summarizes loss-of-function allele counts per transcript and compares sequence contexts of benign and pathogenic stop-gain variants."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// More log output (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// gnomAD VCF to one row per variant with its canonical transcripts
    Canonical {
        #[command(flatten)]
        args: FlattenArgs,

        /// Only count protein-coding transcript features as canonical
        #[arg(long = "protein-coding")]
        protein_coding: bool,
    },
    /// ClinVar VCF to one row per variant and VEP transcript
    Clinvar(FlattenArgs),
    /// gnomAD VCF to one row per variant and VEP transcript with population counts
    Transcripts(FlattenArgs),
    /// Per-transcript LoF summary from `transcripts` tables
    Aggregate(AggregateArgs),
    /// Per-position chi-square comparison of benign and pathogenic contexts
    ContextBias(ContextArgs),
}

#[derive(Args)]
struct FlattenArgs {
    /// Input VCF files (.vcf, .vcf.gz or .vcf.bgz)
    #[arg(value_name = "INPUT_FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory (default: current directory)
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Output file name, `.tsv` appended if missing (single input only)
    #[arg(short = 'n', long = "output-name")]
    output_name: Option<String>,

    /// Number of files processed in parallel (0 = auto-detect)
    #[arg(short = 'j', long = "threads", default_value_t = 1)]
    threads: usize,

    /// Compress output files with gzip
    #[arg(short = 'c', long = "compress")]
    compress: bool,
}

#[derive(Args)]
struct AggregateArgs {
    /// Tables written by the `transcripts` command
    #[arg(value_name = "TABLE", required = true)]
    inputs: Vec<PathBuf>,

    /// Transcript constraint table (transcript, lof.oe_ci.upper, num_coding_exons)
    #[arg(long = "constraint")]
    constraint: PathBuf,

    /// Transcript expression table (ID_transcript, Max_median_expression)
    #[arg(long = "expression")]
    expression: PathBuf,

    /// Output file
    #[arg(short = 'o', long = "output", default_value = "transcript_summary.tsv")]
    output: PathBuf,

    /// Inputs are already restricted to protein-coding LoF rows
    #[arg(long = "no-filter")]
    no_filter: bool,

    /// Match reference ids by equality after removing version suffixes
    #[arg(long = "exact-ids")]
    exact_ids: bool,

    /// Compress output with gzip
    #[arg(short = 'c', long = "compress")]
    compress: bool,
}

#[derive(Args)]
struct ContextArgs {
    /// Transcript cDNA FASTA (plain or gzip)
    #[arg(long = "fasta")]
    fasta: PathBuf,

    /// Canonical table of benign variants
    #[arg(long = "benign")]
    benign: PathBuf,

    /// Canonical table of pathogenic variants
    #[arg(long = "pathogenic")]
    pathogenic: PathBuf,

    /// Bases before the variant
    #[arg(long = "left", default_value_t = 12)]
    left: usize,

    /// Bases after the variant
    #[arg(long = "right", default_value_t = 12)]
    right: usize,

    /// Output file with per-position statistics
    #[arg(short = 'o', long = "output", default_value = "context_bias.tsv")]
    output: PathBuf,

    /// Also write the extracted contexts of both sets into this directory
    #[arg(long = "contexts-dir")]
    contexts_dir: Option<PathBuf>,

    /// Compress output with gzip
    #[arg(short = 'c', long = "compress")]
    compress: bool,
}

fn init_log(cli: &Cli) -> anyhow::Result<()> {
    stderrlog::new()
        .quiet(cli.quiet)
        .verbosity(2 + cli.verbose as usize)
        .init()
        .context("could not initialise logging")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_log(&cli)?;
    let start = Instant::now();

    match &cli.command {
        Command::Canonical {
            args,
            protein_coding,
        } => flatten(args, &CanonicalRows::new(*protein_coding)?)?,
        Command::Clinvar(args) => flatten(args, &ClinvarRows::new()?)?,
        Command::Transcripts(args) => flatten(args, &TranscriptRows::new()?)?,
        Command::Aggregate(args) => aggregate(args)?,
        Command::ContextBias(args) => compare_contexts(args)?,
    }

    info!("🎉 Completed in {:.2?}", start.elapsed());
    Ok(())
}

fn flatten(args: &FlattenArgs, builder: &dyn RowBuilder) -> anyhow::Result<()> {
    for input in &args.inputs {
        if !input.exists() {
            bail!("❌ File '{}' not found", input.display());
        }
    }
    let outputs = output_paths(
        &args.inputs,
        args.output_dir.as_deref(),
        args.output_name.as_deref(),
        args.compress,
    )?;

    let threads = if args.threads == 0 {
        num_cpus::get()
    } else {
        args.threads
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.min(args.inputs.len()).max(1))
        .build()
        .context("could not build thread pool")?;

    info!(
        "🔄 {} file(s) with the {} layout on {} thread(s)",
        args.inputs.len(),
        builder.name(),
        threads
    );

    let results: Vec<(&PathBuf, Result<ReformatStats, VepFlatError>)> = pool.install(|| {
        args.inputs
            .par_iter()
            .zip(outputs.par_iter())
            .map(|(input, output)| (input, reformat_vcf(input, output, builder, args.compress)))
            .collect()
    });

    let mut failed = 0;
    let mut rows = 0;
    for (input, result) in results {
        match result {
            Ok(stats) => rows += stats.rows_written,
            Err(e) => {
                failed += 1;
                error!("❌ {}: {e}", input.display());
            }
        }
    }
    info!("📊 {rows} rows written");

    if failed > 0 {
        bail!("{failed} of {} input files failed", args.inputs.len());
    }
    Ok(())
}

fn aggregate(args: &AggregateArgs) -> anyhow::Result<()> {
    let options = AggregateOptions {
        filter_rows: !args.no_filter,
        id_match: if args.exact_ids {
            IdMatch::StableId
        } else {
            IdMatch::Substring
        },
    };
    let summaries = aggregate_tables(&args.inputs, &args.constraint, &args.expression, options)?;
    write_summaries(&args.output, &summaries, args.compress)?;
    info!(
        "✅ {} transcripts written to {}",
        summaries.len(),
        args.output.display()
    );
    Ok(())
}

fn compare_contexts(args: &ContextArgs) -> anyhow::Result<()> {
    let window = ContextWindow {
        left: args.left,
        right: args.right,
    };
    let sequences = TranscriptSequences::from_fasta(&args.fasta)?;
    if sequences.is_empty() {
        bail!("no sequences in {}", args.fasta.display());
    }

    let benign = load_contexts(&args.benign, &sequences, window)?;
    let pathogenic = load_contexts(&args.pathogenic, &sequences, window)?;

    if let Some(dir) = &args.contexts_dir {
        for (table, records) in [(&args.benign, &benign), (&args.pathogenic, &pathogenic)] {
            let path = contexts_path(table, dir, args.compress);
            write_context_records(&path, records, args.compress)?;
        }
    }

    let tests = context_bias(&benign, &pathogenic);
    write_position_tests(&args.output, &tests, window, args.compress)?;
    info!(
        "✅ {} positions written to {}",
        tests.len(),
        args.output.display()
    );
    Ok(())
}
