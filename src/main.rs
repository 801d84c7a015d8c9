//! sphxfer - controller side of the packet-framed transfer link
//!
//! `push` offers a queue of files to the peer device and serves whatever it
//! asks for; `export` accepts files the peer sends into a local directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use sphxfer::cli::{LinkOpts, OutputOpts};
use sphxfer::config::{config_path, load_config, save_config, Config};
use sphxfer::files::LocalRoot;
use sphxfer::fs_enum::{collect_entries, open_queue, FileFilter};
use sphxfer::log::TransferLog;
use sphxfer::logger::{Logger, MultiLogger, TextLogger};
use sphxfer::progress::{BarProgress, NoopProgress, Progress};
use sphxfer::session::{Session, SessionConfig, SessionSummary};
use sphxfer::throughput::format_bytes;
use sphxfer::transport::open_endpoint;
use sphxfer::url::Endpoint;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "sphxfer - push files to a peer device or receive the files it exports"
)]
struct Args {
    #[command(flatten)]
    link: LinkOpts,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Offer files (or every file under directories) to the peer
    Push {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Only queue files with this extension (repeatable)
        #[arg(long = "ext", action = clap::ArgAction::Append)]
        extensions: Vec<String>,

        /// Exclude files matching patterns
        #[arg(long = "xf", action = clap::ArgAction::Append)]
        exclude_files: Vec<String>,

        /// Exclude directories matching patterns
        #[arg(long = "xd", action = clap::ArgAction::Append)]
        exclude_dirs: Vec<String>,
    },
    /// Receive exported files into a directory
    Export { root: PathBuf },
}

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT); dropping the link is the only cancel
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let args = Args::parse();
    let mut cfg = load_config(args.link.config.as_deref())?;
    if args.link.save_config {
        cfg.log_file = args.output.log_file.clone().or(cfg.log_file.take());
        cfg.journal_file = args.output.journal.clone().or(cfg.journal_file.take());
        let path = config_path(args.link.config.as_deref());
        save_config(&cfg, &path)
            .with_context(|| format!("failed to save settings to {}", path.display()))?;
    }

    let bar = (!args.output.quiet).then(|| Arc::new(BarProgress::new()));
    let logger = build_logger(&args.output, &cfg, bar.as_ref())?;
    let progress: Arc<dyn Progress> = match &bar {
        Some(bar) => bar.clone() as Arc<dyn Progress>,
        None => Arc::new(NoopProgress),
    };

    if let Endpoint::Listen { bind } = &args.link.endpoint {
        logger.event(&format!("waiting for the peer on {}", bind));
    }

    match args.command {
        Command::Push {
            paths,
            extensions,
            exclude_files,
            exclude_dirs,
        } => {
            let filter = FileFilter {
                extensions,
                exclude_files,
                exclude_dirs,
            };
            let entries = collect_entries(&paths, &filter)?;
            if entries.is_empty() {
                anyhow::bail!("nothing to push: no files matched");
            }
            let total: u64 = entries.iter().map(|e| e.size).sum();
            logger.event(&format!(
                "queued {} file(s), {}",
                entries.len(),
                format_bytes(total as f64)
            ));
            let mut queue = open_queue(&entries)?;

            let transport = open_endpoint(&args.link.endpoint, cfg.io_timeout())?;
            let mut session = new_session(transport, &cfg, &args.output, logger, progress);
            let summary = session.run_push(&mut queue).context("push session failed")?;
            report(&summary, args.output.quiet);
        }
        Command::Export { root } => {
            let mut root = LocalRoot::new(&root)
                .with_context(|| format!("cannot export into {}", root.display()))?;

            let transport = open_endpoint(&args.link.endpoint, cfg.io_timeout())?;
            let mut session = new_session(transport, &cfg, &args.output, logger, progress);
            let summary = session.run_export(&mut root).context("export session failed")?;
            report(&summary, args.output.quiet);
        }
    }

    Ok(())
}

fn build_logger(
    output: &OutputOpts,
    cfg: &Config,
    bar: Option<&Arc<BarProgress>>,
) -> Result<Arc<dyn Logger>> {
    let mut sinks: Vec<Arc<dyn Logger>> = Vec::new();
    if let Some(bar) = bar {
        sinks.push(bar.clone());
    }
    if let Some(path) = output.log_file.as_ref().or(cfg.log_file.as_ref()) {
        let text = TextLogger::new(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        sinks.push(Arc::new(text));
    }
    Ok(Arc::new(MultiLogger::new(sinks)))
}

fn new_session<T: sphxfer::transport::Transport>(
    transport: T,
    cfg: &Config,
    output: &OutputOpts,
    logger: Arc<dyn Logger>,
    progress: Arc<dyn Progress>,
) -> Session<T> {
    let session = Session::new(transport, SessionConfig::from(cfg))
        .with_logger(logger)
        .with_progress(progress);
    match output.journal.as_ref().or(cfg.journal_file.as_ref()) {
        Some(path) => session.with_journal(TransferLog::new(path)),
        None => session,
    }
}

fn report(summary: &SessionSummary, quiet: bool) {
    // The bar prints its own completion line
    if quiet {
        println!(
            "{} file(s), {} in {:.1}s",
            summary.files,
            format_bytes(summary.bytes as f64),
            summary.elapsed.as_secs_f64()
        );
    }
}
