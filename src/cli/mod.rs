//! # CLI Module
//!
//! Command-line interface for card ingest.
//!
//! ## Usage
//! ```bash
//! # Ingest a mounted card (uses <volume>/DCIM when present)
//! card-ingest ingest /media/card
//!
//! # Keep everything under one directory
//! CARD_INGEST_HOME=/srv/ingest card-ingest ingest /media/card
//!
//! # Index and session overviews
//! card-ingest stats
//! card-ingest sessions
//! ```

use card_ingest::config::IngestConfig;
use card_ingest::core::pipeline::{IngestOutcome, IngestPipeline, SessionReport};
use card_ingest::core::remote::{LocalObjectStore, RetryingStore};
use card_ingest::core::session::{list_sessions, SessionState};
use card_ingest::core::store::{IngestIndex, SqliteStore, UploadIndex};
use card_ingest::error::Result;
use card_ingest::events::{
    CopyEvent, DeriveEvent, Event, EventChannel, HashEvent, PipelineEvent, ScanEvent, SessionEvent,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// Card Ingest - copy, dedup, derive and share camera cards
#[derive(Parser, Debug)]
#[command(name = "card-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a mounted volume into a new (or resumed) session
    Ingest {
        /// Mount point of the card
        volume: PathBuf,

        #[command(flatten)]
        locations: Locations,

        /// Remote key prefix
        #[arg(long, env = "CARD_INGEST_KEY_PREFIX", default_value = "sessions/")]
        key_prefix: String,

        /// Derivation worker threads
        #[arg(long, env = "CARD_INGEST_DERIVE_WORKERS")]
        derive_workers: Option<usize>,

        /// Upload worker threads
        #[arg(long, env = "CARD_INGEST_UPLOAD_WORKERS")]
        upload_workers: Option<usize>,

        /// Seconds between progressive gallery refreshes
        #[arg(long, env = "CARD_INGEST_REFRESH_SECS")]
        refresh_secs: Option<u64>,

        /// Create a session even when nothing on the card is new
        #[arg(long, env = "CARD_INGEST_ALWAYS_CREATE_SESSION")]
        always_create_session: bool,

        /// Include hidden files
        #[arg(long)]
        include_hidden: bool,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show dedup and upload index counts
    Stats {
        #[command(flatten)]
        locations: Locations,
    },

    /// List local sessions, newest first
    Sessions {
        #[command(flatten)]
        locations: Locations,
    },
}

/// Where sessions, the index and the bucket live
#[derive(Args, Debug)]
struct Locations {
    /// Root for sessions, index and bucket when the specific paths are not given
    #[arg(long, env = "CARD_INGEST_HOME")]
    home: Option<PathBuf>,

    /// Session directory root
    #[arg(long, env = "CARD_INGEST_SESSIONS_DIR")]
    sessions_dir: Option<PathBuf>,

    /// Index database path
    #[arg(long, env = "CARD_INGEST_DB")]
    db: Option<PathBuf>,

    /// Directory backing the object store
    #[arg(long, env = "CARD_INGEST_BUCKET")]
    bucket: Option<PathBuf>,
}

impl Locations {
    fn config(&self) -> IngestConfig {
        let mut config = match &self.home {
            Some(home) => IngestConfig::rooted_at(home),
            None => IngestConfig::default(),
        };
        if let Some(dir) = &self.sessions_dir {
            config = config.with_sessions_dir(dir);
        }
        if let Some(db) = &self.db {
            config = config.with_db_path(db);
        }
        config
    }

    fn bucket_dir(&self, config: &IngestConfig) -> PathBuf {
        self.bucket.clone().unwrap_or_else(|| {
            config
                .db_path
                .parent()
                .map(|dir| dir.join("bucket"))
                .unwrap_or_else(|| PathBuf::from("bucket"))
        })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
}

/// Run the CLI
pub fn run() -> Result<()> {
    card_ingest::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            volume,
            locations,
            key_prefix,
            derive_workers,
            upload_workers,
            refresh_secs,
            always_create_session,
            include_hidden,
            output,
            verbose,
        } => {
            let mut config = locations
                .config()
                .with_key_prefix(key_prefix)
                .with_always_create_session(always_create_session);
            config.derive_workers = derive_workers.unwrap_or(config.derive_workers);
            config.upload_workers = upload_workers.unwrap_or(config.upload_workers);
            if let Some(secs) = refresh_secs {
                config = config.with_refresh_interval(std::time::Duration::from_secs(secs));
            }
            config.include_hidden = include_hidden;
            let bucket = locations.bucket_dir(&config);
            run_ingest(&volume, config, &bucket, output, verbose)
        }
        Commands::Stats { locations } => run_stats(&locations.config()),
        Commands::Sessions { locations } => run_sessions(&locations.config()),
    }
}

/// Cards keep media under `DCIM`; fall back to the mount point itself
fn source_root(volume: &Path) -> PathBuf {
    let dcim = volume.join("DCIM");
    if dcim.is_dir() {
        dcim
    } else {
        volume.to_path_buf()
    }
}

fn run_ingest(
    volume: &Path,
    config: IngestConfig,
    bucket: &Path,
    output: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let term = Term::stderr();
    let pretty = matches!(output, OutputFormat::Pretty);

    if pretty {
        term.write_line(&format!(
            "{} {}",
            style("Card Ingest").bold().cyan(),
            style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
        ))
        .ok();
        term.write_line("").ok();
    }

    let store = RetryingStore::new(LocalObjectStore::open(bucket)?);
    let pipeline = IngestPipeline::builder()
        .config(config)
        .object_store(Arc::new(store))
        .build()?;

    let (sender, receiver) = EventChannel::new();

    let progress = if pretty {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        Some(pb)
    } else {
        None
    };

    let progress_clone = progress.clone();
    let event_thread = thread::spawn(move || {
        let Some(pb) = progress_clone else {
            for _ in receiver.iter() {}
            return;
        };
        for event in receiver.iter() {
            match event {
                Event::Pipeline(PipelineEvent::PhaseChanged { phase }) => {
                    pb.set_message(format!("{}", phase));
                }
                Event::Scan(ScanEvent::Completed { total_files, .. }) => {
                    pb.set_message(format!("{} media files", total_files));
                }
                Event::Hash(HashEvent::Started { total_files, .. }) => {
                    pb.set_length(total_files as u64);
                    pb.set_position(0);
                }
                Event::Hash(HashEvent::Progress(p)) => {
                    pb.set_position(p.completed as u64);
                    if verbose {
                        pb.set_message(p.current_path.file_name().unwrap_or_default().to_string_lossy().into_owned());
                    }
                }
                Event::Copy(CopyEvent::Started { total_files }) => {
                    pb.set_length(total_files as u64);
                    pb.set_position(0);
                }
                Event::Copy(CopyEvent::FileCopied { relative_path, .. }) => {
                    pb.inc(1);
                    if verbose {
                        pb.set_message(relative_path.display().to_string());
                    }
                }
                Event::Copy(CopyEvent::Error { path, message }) => {
                    pb.println(format!("  {} {}: {}", style("!").yellow(), path.display(), message));
                }
                Event::Derive(DeriveEvent::Started { total_sources }) => {
                    pb.set_length(total_sources as u64 * 2);
                    pb.set_position(0);
                }
                Event::Derive(DeriveEvent::ArtifactReady { .. }) => pb.inc(1),
                Event::Derive(DeriveEvent::Error { path, message }) => {
                    pb.println(format!("  {} {}: {}", style("!").yellow(), path.display(), message));
                }
                Event::Session(SessionEvent::ShareLink { url, .. }) => {
                    pb.println(format!("  {} {}", style("Share link:").bold(), url));
                }
                Event::Pipeline(PipelineEvent::Completed { .. })
                | Event::Pipeline(PipelineEvent::NoNewContent { .. })
                | Event::Pipeline(PipelineEvent::Error { .. }) => pb.finish_and_clear(),
                _ => {}
            }
        }
    });

    let result = pipeline.run_with_events(&source_root(volume), &sender);

    // Drop sender to signal event thread to finish
    drop(sender);
    event_thread.join().ok();
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let outcome = result?;
    match output {
        OutputFormat::Pretty => print_pretty_outcome(&term, &outcome),
        OutputFormat::Json => print_json_outcome(&outcome),
    }
    Ok(())
}

fn print_pretty_outcome(term: &Term, outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::NoNewContent { discovered, skipped } => {
            term.write_line(&format!(
                "{} Nothing new: {} files on the card, {} already ingested",
                style("✓").green().bold(),
                style(discovered).cyan(),
                style(skipped).cyan()
            ))
            .ok();
        }
        IngestOutcome::Completed(report) => print_pretty_report(term, report),
    }
}

fn print_pretty_report(term: &Term, report: &SessionReport) {
    let counts = &report.counts;
    term.write_line(&format!(
        "{} Session {}{}",
        style("✓").green().bold(),
        style(&report.session_id).bold(),
        if report.resumed { " (resumed)" } else { "" }
    ))
    .ok();
    term.write_line("").ok();
    term.write_line(&format!(
        "  {} discovered, {} new, {} already ingested",
        style(counts.discovered).cyan(),
        style(counts.new_files).cyan(),
        style(counts.skipped).dim()
    ))
    .ok();
    term.write_line(&format!(
        "  {} processed, {} uploaded, {} unchanged in {:.1}s",
        style(counts.processed).cyan(),
        style(counts.uploaded).cyan(),
        style(counts.upload_unchanged).dim(),
        report.duration_ms as f64 / 1000.0
    ))
    .ok();
    if counts.errors > 0 {
        term.write_line(&format!(
            "  {} files had errors; see the log for details",
            style(counts.errors).yellow()
        ))
        .ok();
    }
    term.write_line("").ok();
    term.write_line(&format!("  {} {}", style("Share link:").bold(), report.share_url))
        .ok();
}

fn print_json_outcome(outcome: &IngestOutcome) {
    let output = match outcome {
        IngestOutcome::NoNewContent { discovered, skipped } => serde_json::json!({
            "session": null,
            "discovered": discovered,
            "skipped": skipped,
        }),
        IngestOutcome::Completed(report) => serde_json::json!({
            "session": report.summary(),
            "resumed": report.resumed,
            "state": report.state,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
}

fn run_stats(config: &IngestConfig) -> Result<()> {
    let term = Term::stdout();
    let store = SqliteStore::open(&config.db_path)?;
    let stats = store.stats()?;
    let uploads = store.upload_count()?;

    term.write_line(&format!("{}", style("Ingest index").bold().underlined()))
        .ok();
    term.write_line(&format!("  database       {}", store.path().display()))
        .ok();
    term.write_line(&format!(
        "  ingested       {} files, {}",
        style(stats.ingested_files).cyan(),
        format_bytes(stats.ingested_bytes)
    ))
    .ok();
    term.write_line(&format!("  uploads        {}", style(uploads).cyan()))
        .ok();
    term.write_line(&format!("  hash failures  {}", style(stats.failed_files).yellow()))
        .ok();
    if let (Some(first), Some(last)) = (stats.first_ingest, stats.last_ingest) {
        term.write_line(&format!(
            "  span           {} to {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        ))
        .ok();
    }
    Ok(())
}

fn run_sessions(config: &IngestConfig) -> Result<()> {
    let term = Term::stdout();
    let sessions = list_sessions(&config.sessions_dir);
    if sessions.is_empty() {
        term.write_line(&format!(
            "No sessions under {}",
            config.sessions_dir.display()
        ))
        .ok();
        return Ok(());
    }

    for (id, manifest) in sessions {
        let state = match manifest.state {
            SessionState::Done => style(manifest.state.as_str()).green(),
            SessionState::Error => style(manifest.state.as_str()).red(),
            other => style(other.as_str()).yellow(),
        };
        term.write_line(&format!(
            "{}  {:<10} {} new, {} processed, {} errors",
            style(id).bold(),
            state,
            manifest.counts.new_files,
            manifest.counts.processed,
            manifest.counts.errors
        ))
        .ok();
        if let Some(error) = &manifest.error {
            term.write_line(&format!("    {}", style(error).red())).ok();
        }
        if let Some(url) = &manifest.share_url {
            term.write_line(&format!("    {}", style(url).dim())).ok();
        }
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
