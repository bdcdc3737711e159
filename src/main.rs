//! ddswatch - DDS texture conversion pipeline
//!
//! CLI shell over the library: `watch` keeps a folder converted as images
//! are authored, `convert` runs a one-shot batch over an existing tree.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use ddswatch::batch::{BatchConverter, BatchEvent};
use ddswatch::config::{self, HandlerConfig, MaxResolution};
use ddswatch::encoder::{EncodeGate, EncoderInvoker};
use ddswatch::watch::{WatchDispatcher, DEFAULT_POOL_SIZE};
use ddswatch::worker::ConversionWorker;

#[derive(Parser)]
#[command(name = "ddswatch")]
#[command(version)]
#[command(about = "Watches a folder and converts source images to DDS textures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args)]
struct ConversionOpts {
    /// Folder containing the source images
    folder: PathBuf,

    /// Include subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Remove each source image after a successful encode
    #[arg(long)]
    delete_source: bool,

    /// Resolution ceiling for square textures
    #[arg(long, value_enum, default_value = "1024")]
    max_resolution: MaxResolution,

    /// Path to the nvcompress binary (default: bin/ beside the
    /// executable, then the system PATH)
    #[arg(long, env = "NVCOMPRESS_PATH")]
    encoder: Option<PathBuf>,
}

impl ConversionOpts {
    fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            delete_source: self.delete_source,
            max_resolution: self.max_resolution,
            recursive: self.recursive,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a folder and re-encode images as they change (Ctrl-C stops)
    Watch {
        #[command(flatten)]
        opts: ConversionOpts,

        /// Worker pool size
        #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
        workers: usize,
    },

    /// Convert every image under a folder once
    Convert {
        #[command(flatten)]
        opts: ConversionOpts,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(
                if cli.verbose {
                    "ddswatch=debug".parse()?
                } else {
                    "ddswatch=warn".parse()?
                },
            ))
            .init();
    }

    match cli.command {
        Commands::Watch { opts, workers } => {
            let encoder =
                EncoderInvoker::discover(opts.encoder.clone(), EncodeGate::exclusive())?;
            let worker = Arc::new(ConversionWorker::new(encoder));
            let config = config::shared(opts.handler_config());

            let mut dispatcher =
                WatchDispatcher::new(worker, config).with_pool_size(workers);
            dispatcher.start(&opts.folder)?;

            println!("Watching {} - press Ctrl-C to stop", opts.folder.display());
            tokio::signal::ctrl_c().await?;

            println!("\nStopping, letting queued conversions finish...");
            dispatcher.stop().await;
        }

        Commands::Convert { opts } => {
            let encoder =
                EncoderInvoker::discover(opts.encoder.clone(), EncodeGate::exclusive())?;
            let worker = ConversionWorker::new(encoder);
            let config = opts.handler_config();
            let folder = opts.folder.clone();

            let (tx, mut rx) = mpsc::unbounded_channel();
            let runner = tokio::task::spawn_blocking(move || {
                BatchConverter::new(&worker).run(&folder, &config, &tx)
            });

            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% ")
                    .unwrap()
                    .progress_chars("=>-"),
            );

            while let Some(event) = rx.recv().await {
                match event {
                    BatchEvent::Progress(percent) => pb.set_position(percent as u64),
                    BatchEvent::Complete => break,
                }
            }

            runner.await??;
            pb.finish_and_clear();
            println!("Conversion complete.");
        }
    }

    Ok(())
}
