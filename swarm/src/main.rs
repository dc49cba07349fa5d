use std::{fs, path::PathBuf, sync::Mutex};
use anyhow::Context;
use clap::Parser;
use swarm::{Config, PeerEngine, PeerId, PeerTable};

#[derive(Parser, Debug)]
#[command(about = "Runs one peer of a file-sharing swarm")]
struct Args {
    #[arg(help = "Id of this peer in the peer list")]
    peer_id: PeerId,

    #[arg(long, default_value = "Common.cfg", help = "Path to the common config")]
    common: PathBuf,

    #[arg(long, default_value = "PeerInfo.cfg", help = "Path to the peer list")]
    peers: PathBuf,

    #[arg(short, long, help = "Directory holding the peer_<id> directories")]
    dir: Option<PathBuf>,

    #[arg(long, default_value = ".", help = "Directory for log_peer_<id>.log")]
    log_dir: PathBuf,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {

    let args = Args::parse();
    init_logging(&args)?;

    run(args).await.map_err(|e| {
        tracing::error!("{:#}", e);
        e
    })
}

// Set up logging to the peer's log file.
fn init_logging(args: &Args) -> anyhow::Result<()> {

    fs::create_dir_all(&args.log_dir)
        .with_context(|| format!("failed to create log directory {:?}", args.log_dir))?;
    let path = args.log_dir.join(format!("log_peer_{}.log", args.peer_id));
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {:?}", path))?;

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let sub = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .finish();
    tracing::subscriber::set_global_default(sub).context("failed to set log subscriber")?;
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {

    let mut config = Config::from_file(&args.common).context("failed to load common config")?;
    if let Some(dir) = args.dir {
        config.data_dir = dir;
    }
    let peers = PeerTable::from_file(&args.peers).context("failed to load peer list")?;

    let engine = PeerEngine::bind(args.peer_id, config, peers).await?;
    engine.run().await?;
    Ok(())
}
