//! sphxfer-peer - device emulator for the transfer link
//!
//! Speaks the console's side of the protocol so a controller can be exercised
//! without hardware: `fetch` pulls every file the controller announces, `send`
//! exports local files to it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sphxfer::cli::LinkOpts;
use sphxfer::config::{config_path, load_config, save_config};
use sphxfer::files::{FileSource, LocalRoot, LocalSource};
use sphxfer::logger::{Logger, NoopLogger};
use sphxfer::peer::Peer;
use sphxfer::progress::BarProgress;
use sphxfer::transport::open_endpoint;

#[derive(Parser, Debug)]
#[command(author, version, about = "sphxfer-peer - emulate the device end of the link")]
struct Args {
    #[command(flatten)]
    link: LinkOpts,

    /// Chunk size to request or send (default from config)
    #[arg(long)]
    chunk_size: Option<u32>,

    /// No status output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull every announced file into a directory
    Fetch {
        #[arg(long)]
        dest: PathBuf,
    },
    /// Export files to the controller
    Send {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory prefix for the exported names (e.g. saves/0100)
        #[arg(long)]
        prefix: Option<String>,
    },
}

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let args = Args::parse();
    let mut cfg = load_config(args.link.config.as_deref())?;
    let chunk_size = args.chunk_size.unwrap_or(cfg.peer_chunk_size);
    if chunk_size == 0 || chunk_size > cfg.max_chunk_size {
        anyhow::bail!(
            "chunk size must be between 1 and {} bytes",
            cfg.max_chunk_size
        );
    }
    if args.link.save_config {
        cfg.peer_chunk_size = chunk_size;
        let path = config_path(args.link.config.as_deref());
        save_config(&cfg, &path)
            .with_context(|| format!("failed to save settings to {}", path.display()))?;
    }

    let bar = (!args.quiet).then(|| Arc::new(BarProgress::new()));
    let logger: Arc<dyn Logger> = match &bar {
        Some(bar) => bar.clone() as Arc<dyn Logger>,
        None => Arc::new(NoopLogger),
    };

    let transport = open_endpoint(&args.link.endpoint, cfg.io_timeout())?;
    let mut peer = Peer::new(transport)
        .with_chunk_size(chunk_size)
        .with_max_resends(cfg.max_chunk_retries)
        .with_logger(logger.clone());
    let started = Instant::now();

    let (files, bytes) = match args.command {
        Command::Fetch { dest } => {
            std::fs::create_dir_all(&dest)
                .with_context(|| format!("failed to create {}", dest.display()))?;
            let mut root = LocalRoot::new(&dest)
                .with_context(|| format!("cannot fetch into {}", dest.display()))?;
            let fetched = peer.fetch_all(&mut root).context("fetch failed")?;
            let bytes = fetched.iter().map(|(_, size)| size).sum::<u64>();
            (fetched.len() as u64, bytes)
        }
        Command::Send { files, prefix } => {
            let mut bytes = 0u64;
            for path in &files {
                let mut source = LocalSource::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                let name = match &prefix {
                    Some(p) => format!("{}/{}", p.trim_end_matches('/'), source.name()),
                    None => source.name().to_string(),
                };
                logger.event(&format!("exporting {}", name));
                bytes += peer
                    .export_file(&name, &mut source)
                    .with_context(|| format!("export of {} failed", path.display()))?;
            }
            peer.quit().context("controller did not acknowledge QUIT")?;
            (files.len() as u64, bytes)
        }
    };

    logger.done(files, bytes, started.elapsed().as_secs_f64());
    if args.quiet {
        println!("{} file(s), {} bytes", files, bytes);
    }
    Ok(())
}
