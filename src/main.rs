//! Master-Unit Concordance Pipeline
//!
//! Builds edition-agnostic master units for *De materia medica* from the
//! entries and alignments of `dmm.db` and writes the concordance tables.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dmm_concordance::db::{load_input, load_input_from_excel, load_input_stats, load_registry};
use dmm_concordance::models::ConcordanceParams;
use dmm_concordance::output::{print_summary, print_units, write_all};
use dmm_concordance::pipeline::{build_concordance, synthetic_corpus};

#[derive(Parser)]
#[command(name = "dmm-concordance")]
#[command(about = "Master-unit concordance across editions of De materia medica")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build master units, ids and the coverage table
    ///
    /// Parameters default to ConcordanceParams::default() (or the --params file).
    /// Flags given explicitly override them.
    Build {
        /// Path to dmm.db
        #[arg(long, required_unless_present = "xlsx", conflicts_with = "xlsx")]
        db: Option<PathBuf>,

        /// Workbook with `entries` and `alignments` sheets, instead of --db
        #[arg(long)]
        xlsx: Option<PathBuf>,

        /// Output directory
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,

        /// Previously frozen master_registry.json; its ids are kept
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Write master_registry.json for the next run
        #[arg(long)]
        freeze: bool,

        /// JSON file with ConcordanceParams
        #[arg(long)]
        params: Option<PathBuf>,

        // === Parameters that inherit from the defaults ===

        /// Master id prefix [default: MMK-]
        #[arg(long)]
        id_prefix: Option<String>,

        /// Zero-padding width of the chapter number [default: 3]
        #[arg(long)]
        chapter_width: Option<usize>,

        /// Comma-separated edition priority for anchor ties
        #[arg(long, value_delimiter = ',')]
        edition_priority: Option<Vec<String>>,

        /// Maximum containment hops for fallback coverage [default: unbounded]
        #[arg(long)]
        max_fallback_distance: Option<u32>,

        /// Suppress progress output
        #[arg(long)]
        quiet: bool,

        /// Print first N master units to console
        #[arg(long)]
        show_units: Option<usize>,
    },

    /// Show input statistics
    Stats {
        /// Path to dmm.db
        #[arg(long)]
        db: PathBuf,
    },

    /// Benchmark the pipeline on a synthetic corpus
    Benchmark {
        /// Number of pipeline runs
        #[arg(long, default_value = "10")]
        iterations: usize,

        /// Books in the synthetic corpus
        #[arg(long, default_value = "5")]
        books: u32,

        /// Chapters per book
        #[arg(long, default_value = "150")]
        chapters: u32,

        /// Segments per chapter
        #[arg(long, default_value = "4")]
        segments: u32,
    },
}

/// Initialize the tracing subscriber on stderr, pretty by default or JSON
/// when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "dmm_concordance=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Build {
            db,
            xlsx,
            out_dir,
            registry,
            freeze,
            params,
            id_prefix,
            chapter_width,
            edition_priority,
            max_fallback_distance,
            quiet,
            show_units,
        } => {
            // Start with library defaults, or the params file
            let defaults = match &params {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => ConcordanceParams::default(),
            };

            // Overlay user-specified values
            let params = ConcordanceParams {
                id_prefix: id_prefix.unwrap_or(defaults.id_prefix),
                chapter_width: chapter_width.unwrap_or(defaults.chapter_width),
                edition_priority: edition_priority.unwrap_or(defaults.edition_priority),
                max_fallback_distance: max_fallback_distance.or(defaults.max_fallback_distance),
            };

            let (entries, edges) = match (&db, &xlsx) {
                (_, Some(path)) => load_input_from_excel(path)?,
                (Some(path), None) => load_input(path)?,
                (None, None) => return Err("either --db or --xlsx is required".into()),
            };
            let registry = registry.as_deref().map(load_registry).transpose()?;

            let result = build_concordance(&entries, &edges, registry.as_ref(), &params, !quiet)?;
            let written = write_all(&result, &out_dir, freeze)?;

            if !quiet {
                print_summary(&result);
                eprintln!();
                for path in &written {
                    eprintln!("Output: {}", path.display());
                }
            }

            if let Some(limit) = show_units {
                println!("\n=== Master Units ===");
                print_units(&result.units, Some(limit));
            }
        }

        Commands::Stats { db } => {
            let stats = load_input_stats(&db)?;

            println!("=== Input Statistics ===");
            println!("Entries: {}", stats.entry_count);
            for (edition, count) in &stats.entries_per_edition {
                println!("  {}: {}", edition, count);
            }
            println!("Alignments: {}", stats.alignment_count);
            for (kind, count) in &stats.alignments_per_type {
                println!("  {}: {}", kind, count);
            }
        }

        Commands::Benchmark {
            iterations,
            books,
            chapters,
            segments,
        } => {
            run_benchmark(iterations, books, chapters, segments)?;
        }
    }

    Ok(())
}

/// Run the pipeline on a synthetic corpus to measure performance.
fn run_benchmark(
    iterations: usize,
    books: u32,
    chapters: u32,
    segments: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let (entries, edges) = synthetic_corpus(books, chapters, segments);
    let params = ConcordanceParams::default();

    println!("=== Pipeline Benchmark ===");
    println!("Iterations: {}", iterations);
    println!("Entries: {}", entries.len());
    println!("Alignments: {}", edges.len());

    let start = Instant::now();
    let mut units = 0;
    for _ in 0..iterations {
        units = build_concordance(&entries, &edges, None, &params, false)?.units.len();
    }
    let elapsed = start.elapsed();
    let per_run = elapsed.as_secs_f64() / iterations.max(1) as f64;

    println!("\nMaster units: {}", units);
    println!("  Total time: {:.3}s", elapsed.as_secs_f64());
    println!("  Per run: {:.3}ms", per_run * 1000.0);
    println!("  Entries/sec: {:.0}", entries.len() as f64 / per_run);

    Ok(())
}
