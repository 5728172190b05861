//! filemut - copy, move, trash, link and bulk rename from the command line.
//!
//! Usage:
//!   filemut copy SRC... --to DIR       Copy entries into DIR
//!   filemut move SRC... --to DIR       Move entries into DIR
//!   filemut delete SRC...              Move entries to the trash
//!   filemut link SRC... --to DIR       Hard (or --symbolic) links in DIR
//!   filemut rename PATH... -t 'Name#'  Bulk rename with a counter
//!   filemut trash list                 Show trashed items
//!   filemut --help                     Show help

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use humansize::{DECIMAL, format_size};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use filemut_core::EngineConfig;
use filemut_ops::{
    BatchEvent, BatchReport, BatchRequest, ConflictDecision, ConflictPolicy,
    DigitSet, OperationScheduler, RenameOptions, TaskStatus, WalkCheckpoint,
};

#[derive(Parser)]
#[command(
    name = "filemut",
    version,
    about = "Asynchronous file mutation engine",
    long_about = "filemut copies, moves, trashes, links and bulk-renames files.\n\n\
                  Every batch reports per-entry outcomes; collisions are settled \
                  by --on-conflict."
)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// What to do when a destination already exists
    #[arg(long, global = true, default_value = "rename")]
    on_conflict: OnConflict,

    /// Print the final report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy entries into a directory
    Copy {
        /// Entries to copy
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination directory
        #[arg(short, long)]
        to: PathBuf,

        /// Resume an interrupted copy at this checkpoint position
        #[arg(long)]
        resume: Option<u64>,
    },

    /// Move entries into a directory
    Move {
        /// Entries to move
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination directory
        #[arg(short, long)]
        to: PathBuf,
    },

    /// Delete entries (to the trash unless --permanent)
    Delete {
        /// Entries to delete
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Unlink instead of trashing
        #[arg(short, long)]
        permanent: bool,
    },

    /// Create links to entries inside a directory
    Link {
        /// Link targets
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Directory for the links
        #[arg(short, long)]
        to: PathBuf,

        /// Create symbolic instead of hard links
        #[arg(short, long)]
        symbolic: bool,
    },

    /// Rename entries from a template containing one '#' counter
    Rename {
        /// Entries in the order they are numbered
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Name template, e.g. "Holiday_#"
        #[arg(short, long)]
        template: String,

        /// First number
        #[arg(long, default_value = "1")]
        start: u64,

        /// Zero-pad numbers to equal width
        #[arg(long)]
        pad: bool,

        /// Digit glyphs (latin, arabic-indic, devanagari, ...)
        #[arg(long, conflicts_with = "locale_digits")]
        digits: Option<String>,

        /// Use the digits of the current locale
        #[arg(long)]
        locale_digits: bool,

        /// Do not keep file extensions
        #[arg(long)]
        drop_extension: bool,

        /// Show the plan without renaming anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Inspect and restore trashed items
    Trash {
        #[command(subcommand)]
        command: TrashCommand,
    },
}

#[derive(Subcommand)]
enum TrashCommand {
    /// List trashed items, oldest first
    List,
    /// Restore an item to where it was deleted from
    Restore { id: String },
    /// Restore an item into another directory
    RestoreTo { id: String, directory: PathBuf },
    /// Delete an item for good
    Purge { id: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnConflict {
    /// Prompt for each collision
    Ask,
    Skip,
    Overwrite,
    /// Keep both, numbering the new entry
    Rename,
    /// Stop at the first collision
    Abort,
}

impl OnConflict {
    fn policy(self) -> ConflictPolicy {
        match self {
            Self::Ask => ConflictPolicy::interactive(),
            Self::Skip => ConflictPolicy::fixed(ConflictDecision::SkipAll),
            Self::Overwrite => ConflictPolicy::fixed(ConflictDecision::OverwriteAll),
            Self::Rename => ConflictPolicy::non_interactive(),
            Self::Abort => ConflictPolicy::fixed(ConflictDecision::Abort),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    tracing::debug!(trash = %config.trash_dir.display(), "Loaded engine configuration");
    let scheduler = OperationScheduler::new(config);
    let policy = cli.on_conflict.policy();

    let request = match cli.command {
        Command::Copy {
            sources,
            to,
            resume,
        } => {
            let request = BatchRequest::copy(sources, to);
            match resume {
                Some(position) => request.resume_from(WalkCheckpoint::new(position)),
                None => request,
            }
        }
        Command::Move { sources, to } => BatchRequest::move_to(sources, to),
        Command::Delete { sources, permanent } => BatchRequest::delete(sources, permanent),
        Command::Link {
            sources,
            to,
            symbolic,
        } => BatchRequest::link(sources, to, symbolic),
        Command::Rename {
            paths,
            template,
            start,
            pad,
            digits,
            locale_digits,
            drop_extension,
            dry_run,
        } => {
            let digits = match digits {
                Some(name) => name
                    .parse::<DigitSet>()
                    .map_err(|_| eyre!("Unknown digit set '{}'", name))?,
                None if locale_digits => DigitSet::from_env(),
                None => DigitSet::Latin,
            };
            let options = RenameOptions {
                start,
                zero_pad: pad,
                digits,
                keep_extension: !drop_extension,
            };
            return run_rename(&scheduler, &paths, &template, &options, dry_run, cli.json).await;
        }
        Command::Trash { command } => return run_trash(&scheduler, command, cli.json),
    };

    let interactive = matches!(cli.on_conflict, OnConflict::Ask);
    let report = run_batch(&scheduler, request, policy, interactive).await?;
    print_report(&report, cli.json)?;

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

async fn run_batch(
    scheduler: &OperationScheduler,
    request: BatchRequest,
    policy: ConflictPolicy,
    interactive: bool,
) -> Result<BatchReport> {
    let mut handle = scheduler.submit(request, policy);
    let events = handle
        .take_events()
        .ok_or_else(|| eyre!("Batch events already taken"))?;
    handle.start()?;

    let listener = tokio::spawn(show_events(events, interactive));
    let report = handle.wait().await?;
    let _ = listener.await;
    eprint!("\r\x1b[2K");
    Ok(report)
}

async fn show_events(mut events: mpsc::Receiver<BatchEvent>, interactive: bool) {
    while let Some(event) = events.recv().await {
        match event {
            BatchEvent::Progress(progress) => {
                let current = progress
                    .current_entry
                    .as_deref()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                eprint!(
                    "\r\x1b[2K{:>5.1}%  {}/{}  {}/{}  {}",
                    progress.percentage(),
                    progress.items_done,
                    progress.items_total,
                    format_size(progress.bytes_done, DECIMAL),
                    format_size(progress.bytes_total, DECIMAL),
                    current
                );
            }
            BatchEvent::Conflict(request) if interactive => {
                let decision = tokio::task::spawn_blocking({
                    let conflict = request.conflict.clone();
                    move || prompt_conflict(&conflict)
                })
                .await
                .unwrap_or(ConflictDecision::Skip);
                request.respond(decision);
            }
            BatchEvent::Conflict(request) => request.respond(ConflictDecision::Skip),
            BatchEvent::Finished(_) => break,
            BatchEvent::TaskFinished(_) | BatchEvent::StateChanged(_) => {}
        }
    }
}

fn prompt_conflict(conflict: &filemut_ops::Conflict) -> ConflictDecision {
    let stdin = std::io::stdin();
    loop {
        eprint!(
            "\r\x1b[2K{} ({})\n  [o]verwrite [O]verwrite all [s]kip [S]kip all [r]ename [R]ename all [a]bort: ",
            conflict.destination.display(),
            conflict.kind
        );
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            return ConflictDecision::Skip;
        }
        let decision = match line.trim() {
            "o" => ConflictDecision::Overwrite,
            "O" => ConflictDecision::OverwriteAll,
            "s" => ConflictDecision::Skip,
            "S" => ConflictDecision::SkipAll,
            "r" => ConflictDecision::AutoRename,
            "R" => ConflictDecision::AutoRenameAll,
            "a" | "A" => ConflictDecision::Abort,
            _ => continue,
        };
        return decision;
    }
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{} ({}, {})", report.summary(), report.state, format_size(report.bytes_done, DECIMAL));
    if let Some(error) = &report.error {
        println!("  error: {}", error);
    }
    for record in report.with_status(TaskStatus::Failed) {
        if let Some(error) = &record.error {
            println!("  failed: {}", error);
        }
    }
    for item in &report.trashed {
        println!("  trashed {} as {}", item.display_name(), item.id);
    }
    if report.cancelled() > 0 && report.checkpoint.position > 0 {
        println!("  resume with --resume {}", report.checkpoint.position);
    }
    Ok(())
}

async fn run_rename(
    scheduler: &OperationScheduler,
    paths: &[PathBuf],
    template: &str,
    options: &RenameOptions,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let engine = scheduler.bulk_rename();
    let plan = match engine.plan_paths(paths, template, options) {
        Ok(plan) => plan,
        Err(filemut_core::EngineError::PlanConflict { conflicts }) => {
            for conflict in &conflicts {
                eprintln!("  {}", conflict);
            }
            bail!("Rename plan has {} conflict(s); nothing was renamed", conflicts.len());
        }
        Err(e) => return Err(e.into()),
    };

    if dry_run {
        for step in plan.steps() {
            println!("{} -> {}", step.entry.path().display(), step.new_name);
        }
        return Ok(());
    }

    let report = engine
        .execute(plan, CancellationToken::new())
        .await
        .context("Bulk rename failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (from, to) in report.renamed() {
            println!("{} -> {}", from.display(), to.display());
        }
        for error in report.failed() {
            println!("  failed: {}", error);
        }
    }
    if report.failed().next().is_some() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_trash(scheduler: &OperationScheduler, command: TrashCommand, json: bool) -> Result<()> {
    let trash = scheduler.trash();
    match command {
        TrashCommand::List => {
            let items = trash.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
                return Ok(());
            }
            for item in items {
                let when = item
                    .deleted_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "unknown time".to_string());
                let from = item
                    .original_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "unknown origin".to_string());
                println!("{}  {}  {}", item.id, when, from);
            }
        }
        TrashCommand::Restore { id } => {
            let restored = trash.restore(&id)?;
            println!("restored {}", restored.display());
        }
        TrashCommand::RestoreTo { id, directory } => {
            let restored = trash.restore_to(&id, &directory)?;
            println!("restored {}", restored.display());
        }
        TrashCommand::Purge { id } => {
            trash.purge(&id)?;
            println!("purged {}", id);
        }
    }
    Ok(())
}
