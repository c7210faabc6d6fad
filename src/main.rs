//! # Metadata Harness CLI (`mdh`)
//!
//! Thin command-line surface over the ingestion pipeline. Logs go to stderr;
//! records (text or JSON) go to stdout.
//!
//! ## Usage
//!
//! ```bash
//! mdh --config ./config/mdh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdh ingest <identifier>` | Fetch, extract and validate one dataset record |
//! | `mdh ingest <identifier> --data-files` | Also list or unpack the dataset's data files |
//! | `mdh batch <file>` | Ingest every identifier listed in a file |
//! | `mdh extract <path>` | Extract a local file or directory, no network |
//! | `mdh catalogues` | List catalogue profiles and their URL order |
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | Fetch error (all candidates exhausted, unknown catalogue) |
//! | 2 | Extraction error (unsupported or malformed document) |
//! | 3 | Validation error |
//! | 4 | Unexpected error (including configuration errors) |
//! | 130 | Interrupted |

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use metadata_harness::batch::{self, BatchSummary};
use metadata_harness::config::{self, Config};
use metadata_harness::datafiles::{DataFileFetcher, DataFileLimits};
use metadata_harness::error::{FailureCause, EXIT_INTERRUPTED};
use metadata_harness::factory::ExtractorFactory;
use metadata_harness::fetcher::{self, FetchRequest, MetadataFetcher};
use metadata_harness::local;
use metadata_harness::models::{DocumentFormat, IngestRecord};
use metadata_harness::pipeline::Pipeline;
use metadata_harness::validation::ValidationMode;

/// Metadata Harness CLI: ingest geospatial dataset metadata from remote
/// catalogues.
#[derive(Parser)]
#[command(
    name = "mdh",
    about = "Metadata Harness: fetch and normalize geospatial dataset metadata",
    version,
    long_about = "Fetches dataset metadata records from remote catalogues (trying several URLs \
    and encodings with retry), extracts them from ISO 19139 XML, JSON, JSON-LD or RDF Turtle, \
    and validates them into one normalized record."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/mdh.toml` when that file exists; otherwise the
    /// built-in defaults and catalogue profiles are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one dataset record.
    ///
    /// Tries the catalogue's candidate URLs in order, extracts the first
    /// well-formed document and prints the validated record.
    Ingest {
        /// Catalogue identifier of the dataset.
        identifier: String,

        #[command(flatten)]
        fetch: FetchArgs,

        #[command(flatten)]
        data: DataFileArgs,

        /// Print the full record (including the raw document) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ingest every identifier in a file.
    ///
    /// One identifier per line; blank lines and `#` comments are skipped.
    /// Failures do not stop the batch.
    Batch {
        /// File with one identifier per line.
        file: PathBuf,

        #[command(flatten)]
        fetch: FetchArgs,

        /// Number of identifiers processed concurrently.
        #[arg(long, default_value_t = 4)]
        jobs: usize,

        /// Process at most this many identifiers.
        #[arg(long)]
        max: Option<usize>,

        /// Print each successful record as one JSON line.
        #[arg(long)]
        json: bool,
    },

    /// Extract and validate local documents without network access.
    ///
    /// Accepts a file or a directory; directories are walked recursively and
    /// every file with a supported extension is extracted.
    Extract {
        /// File or directory.
        path: PathBuf,

        /// Fail on missing ISO core fields instead of warning.
        #[arg(long)]
        strict: bool,

        /// Print records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List catalogue profiles and their candidate URL order.
    Catalogues,
}

#[derive(Args)]
struct FetchArgs {
    /// Catalogue profile name.
    #[arg(long, default_value = "ceh")]
    catalogue: String,

    /// Preferred encoding: `xml`, `json`, `jsonld` or `rdf`.
    #[arg(long)]
    format: Option<DocumentFormat>,

    /// Fail on missing ISO core fields instead of warning.
    #[arg(long)]
    strict: bool,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Attempts per candidate URL.
    #[arg(long)]
    retries: Option<u32>,
}

#[derive(Args)]
struct DataFileArgs {
    /// After ingesting, list the dataset's folder (fileAccess) or unpack its
    /// archive (download). Failures are reported but do not fail the ingest.
    #[arg(long)]
    data_files: bool,

    /// Most data files listed or unpacked.
    #[arg(long, requires = "data_files")]
    max_files: Option<usize>,

    /// Subfolder levels followed below a fileAccess folder.
    #[arg(long, requires = "data_files")]
    max_depth: Option<usize>,

    /// Largest archive accepted, in MiB.
    #[arg(long, requires = "data_files")]
    max_size_mb: Option<u64>,

    /// Directory archives are unpacked into.
    #[arg(long, requires = "data_files")]
    data_dir: Option<PathBuf>,
}

impl DataFileArgs {
    fn fetcher(&self, cfg: &Config) -> anyhow::Result<DataFileFetcher> {
        let mut files = cfg.data_files.clone();
        if let Some(n) = self.max_files {
            files.max_files = n;
        }
        if let Some(n) = self.max_depth {
            files.max_depth = n;
        }
        if let Some(mb) = self.max_size_mb {
            files.max_size_mb = mb;
        }
        if let Some(dir) = &self.data_dir {
            files.dir = dir.clone();
        }
        if files.max_files == 0 || files.max_size_mb == 0 {
            anyhow::bail!("--max-files and --max-size-mb must be at least 1");
        }
        DataFileFetcher::new(
            DataFileLimits::from_config(&files),
            files.dir,
            cfg.fetch.timeout(),
            &cfg.fetch.user_agent,
        )
    }
}

impl FetchArgs {
    fn request(&self, identifier: impl Into<String>) -> FetchRequest {
        FetchRequest::new(identifier, self.catalogue.clone())
            .with_format(self.format)
            .with_timeout(self.timeout.map(Duration::from_secs))
            .with_max_retries(self.retries)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    tokio::select! {
        code = run(cli) => ExitCode::from(code),
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("metadata_harness={level},mdh={level}"))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> u8 {
    let cfg = match config::resolve_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ConfigError: {:#}", e);
            return FailureCause::UnexpectedFailure.exit_code();
        }
    };

    match cli.command {
        Commands::Ingest {
            identifier,
            fetch,
            data,
            json,
        } => cmd_ingest(&cfg, identifier, &fetch, &data, json).await,
        Commands::Batch {
            file,
            fetch,
            jobs,
            max,
            json,
        } => cmd_batch(&cfg, &file, &fetch, jobs, max, json).await,
        Commands::Extract { path, strict, json } => cmd_extract(&cfg, path, strict, json).await,
        Commands::Catalogues => cmd_catalogues(&cfg),
    }
}

fn build_pipeline(
    cfg: &Config,
    strict: bool,
) -> anyhow::Result<Pipeline<MetadataFetcher, ExtractorFactory>> {
    let mode = ValidationMode::from_strict(strict || cfg.validation.strict);
    let fetcher = MetadataFetcher::from_config(cfg)?;
    Ok(Pipeline::new(fetcher, ExtractorFactory::new(mode)))
}

fn unexpected(e: anyhow::Error) -> u8 {
    eprintln!("UnexpectedError: {:#}", e);
    FailureCause::UnexpectedFailure.exit_code()
}

async fn cmd_ingest(
    cfg: &Config,
    identifier: String,
    args: &FetchArgs,
    data: &DataFileArgs,
    json: bool,
) -> u8 {
    let pipeline = match build_pipeline(cfg, args.strict) {
        Ok(p) => p,
        Err(e) => return unexpected(e),
    };
    let data_fetcher = if data.data_files {
        match data.fetcher(cfg) {
            Ok(f) => Some(f),
            Err(e) => return unexpected(e),
        }
    } else {
        None
    };

    match pipeline.run(&args.request(identifier)).await {
        Ok(outcome) => {
            let mut record = outcome.record;
            if let Some(fetcher) = &data_fetcher {
                match fetcher.discover(record.id(), &record.metadata).await {
                    Ok(files) => record.data_files = files,
                    Err(e) => eprintln!("Warning [data_files]: {}", e),
                }
            }
            match print_record(&record, json, false) {
                Ok(()) => 0,
                Err(e) => unexpected(e),
            }
        }
        Err(e) => {
            eprintln!("{}: {}", e.error.kind(), e.error);
            e.exit_code()
        }
    }
}

async fn cmd_batch(
    cfg: &Config,
    file: &Path,
    args: &FetchArgs,
    jobs: usize,
    max: Option<usize>,
    json: bool,
) -> u8 {
    let identifiers = match batch::load_identifiers(file, max) {
        Ok(ids) => ids,
        Err(e) => return unexpected(e),
    };
    let pipeline = match build_pipeline(cfg, args.strict) {
        Ok(p) => Arc::new(p),
        Err(e) => return unexpected(e),
    };

    let requests = identifiers.iter().map(|id| args.request(id.as_str())).collect();
    let items = batch::run_batch(pipeline, requests, jobs).await;

    for item in &items {
        if let Ok(outcome) = &item.result {
            if let Err(e) = print_record(&outcome.record, json, true) {
                return unexpected(e);
            }
        }
    }

    let summary = BatchSummary::from_items(&items);
    if json {
        eprintln!("{}", summary.render(10));
    } else {
        println!("{}", summary.render(10));
    }
    summary.exit_code()
}

async fn cmd_extract(cfg: &Config, path: PathBuf, strict: bool, json: bool) -> u8 {
    let factory = ExtractorFactory::new(ValidationMode::from_strict(
        strict || cfg.validation.strict,
    ));
    let files = match local::discover_files(&path, &factory.supported_extensions()) {
        Ok(files) => files,
        Err(e) => return unexpected(e),
    };
    if files.is_empty() {
        eprintln!("No supported documents under {}", path.display());
        return 0;
    }

    let many = files.len() > 1;
    let results = tokio::task::spawn_blocking(move || {
        files
            .into_iter()
            .map(|file| {
                let result = local::extract_file(&factory, &file);
                (file, result)
            })
            .collect::<Vec<_>>()
    })
    .await;
    let results = match results {
        Ok(results) => results,
        Err(e) => return unexpected(e.into()),
    };

    let mut exit = 0;
    for (file, result) in results {
        match result {
            Ok(record) => {
                if !json && many {
                    println!("== {}", file.display());
                }
                if let Err(e) = print_record(&record, json, many) {
                    return unexpected(e);
                }
            }
            Err(e) => {
                eprintln!("{}: {}: {}", file.display(), e.kind(), e);
                if exit == 0 {
                    exit = e.cause().exit_code();
                }
            }
        }
    }
    exit
}

fn cmd_catalogues(cfg: &Config) -> u8 {
    for (name, profile) in &cfg.catalogues {
        if profile.description.is_empty() {
            println!("{}", name);
        } else {
            println!("{}: {}", name, profile.description);
        }
        for (i, endpoint) in fetcher::endpoint_order(profile, None).iter().enumerate() {
            let accept = endpoint
                .accept
                .as_deref()
                .map(|a| format!("  (Accept: {})", a))
                .unwrap_or_default();
            println!(
                "  {}. {:<10} {:<6} {}{}",
                i + 1,
                endpoint.kind,
                endpoint.format.token(),
                endpoint.url,
                accept
            );
        }
    }
    0
}

/// Text summary, pretty JSON, or one JSON line when `compact`.
fn print_record(record: &IngestRecord, json: bool, compact: bool) -> anyhow::Result<()> {
    if json {
        let text = if compact {
            serde_json::to_string(record)?
        } else {
            serde_json::to_string_pretty(record)?
        };
        println!("{}", text);
        return Ok(());
    }

    println!("Dataset: {}", record.dataset.id);
    println!("Source: {}", record.dataset.source_url);
    println!("{}", record.metadata.summary());
    for warning in &record.metadata.warnings {
        println!("Warning [{}]: {}", warning.field, warning.message);
    }
    if !record.data_files.is_empty() {
        println!("Data files: {}", record.data_files.len());
        for file in &record.data_files {
            match &file.checksum {
                Some(sum) => println!("  {} ({} bytes, sha256 {})", file.filename, file.file_size, sum),
                None => println!("  {} -> {}", file.filename, file.file_path),
            }
        }
    }
    Ok(())
}
