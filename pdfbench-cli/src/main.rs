use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pdfbench::batch::ProgressBar;
use pdfbench::compare::compare;
use pdfbench::reports::{
    astrotruth, detect_chaos, floodlight, highlight, spotlight, HasStatus, Record, ReportOptions,
    Table, TableFormat,
};
use pdfbench::{DocumentHandle, ToolRegistry};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::BenchConfig;

#[derive(Parser)]
#[command(
    name = "pdfbench",
    about = "Differential benchmarking of PDF tools",
    version,
    author
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by every batch operation
#[derive(Args)]
struct BatchArgs {
    /// PDF files, or directories searched for *.pdf
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON configuration with tool definitions and limits
    #[arg(short, long, default_value = "pdfbench.json")]
    config: PathBuf,

    /// Tools to run (defaults to every suitable configured tool)
    #[arg(short, long, value_delimiter = ',')]
    tools: Vec<String>,

    /// Worker threads (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Per-unit timeout in seconds (overrides the config file)
    #[arg(long)]
    timeout: Option<f64>,

    /// Output format: csv, tsv or jsonl
    #[arg(short, long, default_value = "csv")]
    format: TableFormat,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Draw a progress bar on stderr
    #[arg(long)]
    progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every document with every tool
    Highlight {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Compare the page renders of every pair of tools
    Spotlight {
        #[command(flatten)]
        batch: BatchArgs,

        /// Directory for structural difference images
        #[arg(long)]
        diff: Option<PathBuf>,
    },

    /// Run each tool repeatedly and flag nondeterministic output
    Chaos {
        #[command(flatten)]
        batch: BatchArgs,

        /// Runs per tool and document (overrides the config file)
        #[arg(long)]
        runs: Option<usize>,
    },

    /// Decide whether documents are valid, recoverable or ambiguous
    Floodlight {
        #[command(flatten)]
        batch: BatchArgs,

        /// Tools used to rewrite rejected documents
        #[arg(short, long, value_delimiter = ',')]
        reforgers: Vec<String>,

        /// Include the trace messages seen during the check
        #[arg(long)]
        gather_traces: bool,
    },

    /// Label documents by the agreement of all tools
    Astrotruth {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Compare two page images
    Compare {
        first: PathBuf,
        second: PathBuf,

        /// Write the structural difference image here
        #[arg(long)]
        diff: Option<PathBuf>,
    },

    /// List the configured tools and their capabilities
    Tools {
        #[arg(short, long, default_value = "pdfbench.json")]
        config: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "pdfbench=debug" } else { "pdfbench=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Expand directories into the PDF files they contain, sorted by path
fn collect_documents(inputs: &[PathBuf]) -> Result<Vec<DocumentHandle>> {
    let mut documents = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to list {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
                })
                .collect();
            found.sort();
            debug!(dir = %input.display(), files = found.len(), "expanded input directory");
            documents.extend(found.into_iter().map(DocumentHandle::from_path));
        } else {
            documents.push(DocumentHandle::from_path(input));
        }
    }
    if documents.is_empty() {
        bail!("no PDF documents found in the given inputs");
    }
    Ok(documents)
}

/// Everything a batch operation needs
struct Prepared {
    documents: Vec<DocumentHandle>,
    registry: ToolRegistry,
    options: ReportOptions,
}

fn prepare(args: &BatchArgs) -> Result<Prepared> {
    let config = BenchConfig::load(&args.config)?.with_overrides(args.workers, args.timeout)?;
    let registry = config.registry()?;
    if registry.is_empty() {
        bail!("no tools configured in {}", args.config.display());
    }
    let mut options = config.report_options()?;
    if args.progress {
        let bar = ProgressBar::default();
        options.batch = options.batch.with_progress_callback(move |progress| {
            eprint!("\r{}", bar.render(progress));
            if progress.is_complete() {
                eprintln!();
            }
        });
    }
    let documents = collect_documents(&args.inputs)?;
    info!(
        documents = documents.len(),
        tools = registry.len(),
        "configuration loaded"
    );
    Ok(Prepared {
        documents,
        registry,
        options,
    })
}

fn emit<R: Record + HasStatus>(table: &Table<R>, args: &BatchArgs) -> Result<()> {
    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            table.write(args.format, &mut writer)?;
            writer.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            table.write(args.format, &mut writer)?;
        }
    }
    eprintln!(
        "{}: {} rows, {} failed",
        table.operation,
        table.len(),
        table.failures().count()
    );
    Ok(())
}

fn compare_images(first: &Path, second: &Path, diff: Option<&Path>) -> Result<()> {
    let load = |path: &Path| -> Result<image::RgbImage> {
        Ok(image::open(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?
            .to_rgb8())
    };
    let a = load(first)?;
    let b = load(second)?;

    let result = compare(Some(&a), Some(&b), diff.is_some());
    if let (Some(path), Some(image)) = (diff, &result.diff) {
        image
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_success() {
        bail!("comparison incomplete: {}", result.outcome);
    }
    Ok(())
}

fn list_tools(config: &Path) -> Result<()> {
    let config = BenchConfig::load(config)?;
    for spec in &config.tools {
        let roles: Vec<&str> = spec.capabilities().roles().map(|r| r.key()).collect();
        println!("{}\t{}", spec.name, roles.join(","));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Highlight { batch } => {
            let p = prepare(&batch)?;
            let table = highlight(&p.documents, &p.registry, &batch.tools, &p.options)?;
            emit(&table, &batch)?;
        }

        Commands::Spotlight { batch, diff } => {
            let mut p = prepare(&batch)?;
            if let Some(dir) = diff {
                p.options = p.options.with_diff_dir(dir);
            }
            let table = spotlight(&p.documents, &p.registry, &batch.tools, &p.options)?;
            emit(&table, &batch)?;
        }

        Commands::Chaos { batch, runs } => {
            let mut p = prepare(&batch)?;
            if let Some(runs) = runs {
                p.options = p.options.with_chaos_runs(runs);
            }
            let table = detect_chaos(&p.documents, &p.registry, &batch.tools, &p.options)?;
            emit(&table, &batch)?;
        }

        Commands::Floodlight {
            batch,
            reforgers,
            gather_traces,
        } => {
            let p = prepare(&batch)?;
            let options = p.options.gather_traces(gather_traces);
            let table = floodlight(&p.documents, &p.registry, &batch.tools, &reforgers, &options)?;
            emit(&table, &batch)?;
        }

        Commands::Astrotruth { batch } => {
            let p = prepare(&batch)?;
            let table = astrotruth(&p.documents, &p.registry, &batch.tools, &p.options)?;
            emit(&table, &batch)?;
        }

        Commands::Compare {
            first,
            second,
            diff,
        } => compare_images(&first, &second, diff.as_deref())?,

        Commands::Tools { config } => list_tools(&config)?,
    }

    Ok(())
}
