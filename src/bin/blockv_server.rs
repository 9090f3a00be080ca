//! Export a disk image as a block device over TCP.

use anyhow::Result;
use blockv::server::Server;
use blockv::store::FileStore;
use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blockv_server", version, about = "Export a disk image over TCP")]
struct Cli {
    /// Disk image to export
    device_file: PathBuf,

    /// Reject writes
    #[arg(long)]
    read_only: bool,

    /// Listen port
    #[arg(long, default_value_t = blockv::DEFAULT_PORT)]
    port: u16,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = serve(&cli);

    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
    result
}

fn serve(cli: &Cli) -> Result<()> {
    let store = FileStore::open(&cli.device_file, cli.read_only)?;
    let server = Server::bind(("0.0.0.0", cli.port), store)?;
    server.run()?;
    Ok(())
}
