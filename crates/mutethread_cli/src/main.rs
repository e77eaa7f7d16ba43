//! Command-line entry point for mutethread.
//!
//! # Responsibility
//! - Map command-line arguments onto core configuration.
//! - Open the store in the mode each command needs and run it.
//! - Print thread views and run summaries; diagnostics go to the log.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use mutethread_core::{
    default_log_level, import_paths, init_logging_with, open_db, open_store, render_thread,
    AddressMatch, LogConfig, MessageId, MessageStore, MuteConfig, MuteService, MuteTags,
    OpenMode, SqliteMessageStore,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "mutethread",
    version = mutethread_core::core_version(),
    about = "Propagate a mute tag down email threads until someone addresses you again"
)]
struct Cli {
    /// Log level: trace, debug, info, warn or error.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory for rotated log files. Logging is off when omitted.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply the muted tag to every thread carrying the mute command tag.
    Mute(MuteArgs),
    /// Import message files or maildir trees into the database.
    Import(ImportArgs),
    /// Add tags to every message matching a query.
    Tag(TagArgs),
    /// Print matching threads with mute and addressing markers.
    Show(ShowArgs),
}

#[derive(Debug, Args)]
struct TagNames {
    /// Tag applied by hand to request muting.
    #[arg(long, default_value = mutethread_core::model::mute::DEFAULT_COMMAND_TAG)]
    command_tag: String,

    /// Tag this tool applies to muted messages.
    #[arg(long, default_value = mutethread_core::model::mute::DEFAULT_MUTED_TAG)]
    muted_tag: String,

    /// Internal marker for messages already handled.
    #[arg(long, default_value = mutethread_core::model::mute::DEFAULT_PROCESSED_TAG)]
    processed_tag: String,
}

impl TagNames {
    fn to_tags(&self) -> MuteTags {
        MuteTags {
            command: self.command_tag.clone(),
            muted: self.muted_tag.clone(),
            processed: self.processed_tag.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct MuteArgs {
    /// The email address to check for in To/Cc.
    #[arg(long)]
    email: String,

    /// Path to the message database.
    #[arg(long)]
    db_path: PathBuf,

    /// Print each selected thread before and after muting.
    #[arg(long, default_value_t = false)]
    verbose: bool,

    /// Extra query terms; only threads also matching them are modified.
    #[arg(long, default_value = "")]
    query_extra: String,

    /// How the address is matched: exact, case-insensitive or normalized.
    #[arg(long, default_value_t = AddressMatch::CaseInsensitive)]
    address_match: AddressMatch,

    /// Print the run summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    tags: TagNames,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// Path to the message database (created when missing).
    #[arg(long)]
    db_path: PathBuf,

    /// Tag to add to every newly imported message. Repeatable.
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Print the import summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Message files or directories to import.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct TagArgs {
    /// Path to the message database.
    #[arg(long)]
    db_path: PathBuf,

    /// Query selecting the messages to tag.
    #[arg(long)]
    query: String,

    /// Tag to add. Repeatable.
    #[arg(long = "add", required = true)]
    add: Vec<String>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Path to the message database.
    #[arg(long)]
    db_path: PathBuf,

    /// Address used for the To/Cc markers.
    #[arg(long, default_value = "")]
    email: String,

    /// Query selecting the threads to print.
    #[arg(long, default_value = "*")]
    query: String,

    #[arg(long, default_value_t = AddressMatch::CaseInsensitive)]
    address_match: AddressMatch,

    #[command(flatten)]
    tags: TagNames,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli
            .log_level
            .clone()
            .unwrap_or_else(|| default_log_level().to_string());
        setup_logging(&level, log_dir)?;
    }

    match cli.command {
        Command::Mute(args) => run_mute(args),
        Command::Import(args) => run_import(args),
        Command::Tag(args) => run_tag(args),
        Command::Show(args) => run_show(args),
    }
}

fn setup_logging(level: &str, log_dir: &Path) -> Result<()> {
    let absolute = if log_dir.is_absolute() {
        log_dir.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot resolve current directory for --log-dir")?
            .join(log_dir)
    };
    let log_dir = absolute
        .to_str()
        .ok_or_else(|| anyhow!("--log-dir must be valid UTF-8"))?;
    let mut config = LogConfig::new(level, log_dir);
    config.echo_stderr = true;
    init_logging_with(&config).map_err(|err| anyhow!(err))
}

fn run_mute(args: MuteArgs) -> Result<()> {
    let conn = open_store(&args.db_path, OpenMode::ReadWrite)?;
    let store = SqliteMessageStore::try_new(&conn)?;
    let config = MuteConfig {
        target_address: args.email.clone(),
        address_match: args.address_match,
        tags: args.tags.to_tags(),
    };
    let service = MuteService::new(store, config);

    if args.verbose {
        for root in service.select_candidate_roots(&args.query_extra)? {
            print_thread(&service, root)?;
            println!();
        }
        println!("muting...");
    }

    let report = service.run(&args.query_extra)?;

    if args.verbose {
        for root in &report.roots {
            print_thread(&service, *root)?;
            println!();
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "threads={} visited={} muted={} muted_added={} processed_added={}",
            report.roots.len(),
            report.totals.visited,
            report.totals.muted,
            report.totals.muted_added,
            report.totals.processed_added
        );
    }
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<()> {
    let conn = open_db(&args.db_path, OpenMode::Create)
        .with_context(|| format!("cannot open database `{}`", args.db_path.display()))?;
    let store = SqliteMessageStore::try_new(&conn)?;
    let report = import_paths(&store, &args.paths, &args.tags)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for skipped in &report.skipped {
            eprintln!("skipped {}: {}", skipped.path.display(), skipped.reason);
        }
        println!(
            "scanned={} imported={} duplicates={} skipped={}",
            report.scanned,
            report.imported,
            report.duplicates,
            report.skipped.len()
        );
    }
    Ok(())
}

fn run_tag(args: TagArgs) -> Result<()> {
    let conn = open_db(&args.db_path, OpenMode::ReadWrite)
        .with_context(|| format!("cannot open database `{}`", args.db_path.display()))?;
    let store = SqliteMessageStore::try_new(&conn)?;
    let matches = store.search_messages(store.query(&args.query)?)?;
    for id in &matches {
        for tag in &args.add {
            store.add_tag(*id, tag)?;
        }
    }
    info!(
        "event=tag_apply module=cli status=ok messages={} tags={}",
        matches.len(),
        args.add.len()
    );
    println!("tagged={}", matches.len());
    Ok(())
}

fn run_show(args: ShowArgs) -> Result<()> {
    let conn = open_db(&args.db_path, OpenMode::ReadOnly)
        .with_context(|| format!("cannot open database `{}`", args.db_path.display()))?;
    let store = SqliteMessageStore::try_new(&conn)?;
    let roots = store.search_roots(store.query(&args.query)?)?;
    let config = MuteConfig {
        target_address: args.email,
        address_match: args.address_match,
        tags: args.tags.to_tags(),
    };
    let service = MuteService::new(store, config);
    for root in roots {
        print_thread(&service, root)?;
        println!();
    }
    Ok(())
}

fn print_thread<S: MessageStore>(service: &MuteService<S>, root: MessageId) -> Result<()> {
    let lines = render_thread(service.store(), service.matcher(), service.tags(), root)?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
