//! Mount the block-device filesystem.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blockv_fuse", version, about = "Mount a block-device filesystem")]
struct Cli {
    /// Directory to mount at
    mountpoint: PathBuf,

    /// Allow root to access the mount (needed for `mount -o loop`)
    #[arg(long)]
    allow_root: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = blockv::fs::mount(&cli.mountpoint, cli.allow_root);

    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
    result
}
