//! CLI command implementations

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use tidefetch_core::descriptor::{DEFAULT_PIECE_LENGTH, DescriptorCreator};
use tidefetch_core::engine::{EngineConfig, SwarmEngineFactory};
use tidefetch_core::network::{NetworkIdentity, PortSelection, allocate_port};
use tidefetch_core::{
    DownloadOrchestrator, EngineFactory, FetchConfig, TorrentDescriptor, TorrentEngine,
    TransferHandle,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Download the torrent described at a URL
    Download {
        /// HTTP(S) URL of the .torrent file
        url: String,
        /// Destination directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Give up waiting after this many seconds (0 waits forever)
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Listen address instead of the platform default
        #[arg(long)]
        listen_addr: Option<IpAddr>,
        /// Fixed listen port instead of an ephemeral one
        #[arg(long)]
        port: Option<u16>,
        /// Peer to dial directly; repeatable
        #[arg(long = "peer")]
        peers: Vec<SocketAddr>,
        /// Enable the engine's debug toggle
        #[arg(long)]
        debug_engine: bool,
    },
    /// Print the contents of a torrent descriptor
    Inspect {
        /// URL or local path of the .torrent file
        source: String,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Create a single-file torrent descriptor
    Create {
        /// File to describe
        file: PathBuf,
        /// Tracker announce URL; repeatable
        #[arg(long)]
        announce: Vec<String>,
        /// Output path (defaults to <file name>.torrent)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_PIECE_LENGTH)]
        piece_length: u32,
    },
    /// Serve a torrent's data to peers until interrupted
    Seed {
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Directory holding the torrent's files
        #[arg(long)]
        data: PathBuf,
        /// Listen port (defaults to 6881)
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        listen_addr: Option<IpAddr>,
    },
    /// Print a currently unused ephemeral port
    Port,
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failing command's error; download failures carry a
/// `FetchError` for the exit code.
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Download {
            url,
            output,
            deadline_secs,
            listen_addr,
            port,
            peers,
            debug_engine,
        } => {
            let mut config = FetchConfig::from_env();
            if let Some(seconds) = deadline_secs {
                config.download.completion_deadline =
                    (seconds > 0).then(|| Duration::from_secs(seconds));
            }
            if listen_addr.is_some() {
                config.network.listen_address = listen_addr;
            }
            if let Some(port) = port {
                config.network.port_selection = PortSelection::Fixed(port);
            }
            config.network.initial_peers.extend(peers);
            config.download.debug_engine |= debug_engine;
            download(&url, &output, config).await
        }
        Commands::Inspect { source, json } => inspect(&source, json).await,
        Commands::Create {
            file,
            announce,
            output,
            piece_length,
        } => create(&file, announce, output, piece_length).await,
        Commands::Seed {
            torrent,
            data,
            port,
            listen_addr,
        } => seed(&torrent, &data, port, listen_addr).await,
        Commands::Port => {
            let allocation = allocate_port();
            println!("{}", allocation.port);
            tracing::debug!(port = allocation.port, source = %allocation.source, "Allocated port");
            Ok(())
        }
    }
}

/// Downloads into `output`, cancelling cleanly on Ctrl-C.
///
/// # Errors
/// - `FetchError` - Any orchestrator failure
pub async fn download(url: &str, output: &Path, config: FetchConfig) -> Result<()> {
    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let client = reqwest::Client::builder()
        .user_agent(config.network.user_agent.clone())
        .build()
        .context("Failed to build HTTP client")?;
    let orchestrator = DownloadOrchestrator::new(SwarmEngineFactory, config);

    println!("Downloading {url}");
    let interrupted = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let completed = orchestrator
        .download_file_until(output, &client, url, interrupted)
        .await?;

    println!(
        "Downloaded {} ({} bytes) in {:.1}s",
        completed.name,
        completed.total_length,
        completed.elapsed.as_secs_f64()
    );
    for file in &completed.files {
        println!("  {}", file.display());
    }
    Ok(())
}

async fn read_descriptor(source: &str) -> Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::get(source)
            .await
            .with_context(|| format!("Failed to fetch {source}"))?;
        if !response.status().is_success() {
            bail!("{source} returned HTTP {}", response.status());
        }
        Ok(response.bytes().await?.to_vec())
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {source}"))
    }
}

/// Prints a descriptor summary.
///
/// # Errors
/// - Descriptor could not be read or parsed
pub async fn inspect(source: &str, json: bool) -> Result<()> {
    let bytes = read_descriptor(source).await?;
    let descriptor = TorrentDescriptor::from_bytes(&bytes)
        .with_context(|| format!("{source} is not a valid torrent"))?;
    let summary = descriptor.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Name:         {}", summary.name);
    println!("Info hash:    {}", summary.info_hash);
    println!("Total size:   {} bytes", summary.total_length);
    println!(
        "Pieces:       {} x {} bytes",
        summary.num_pieces, summary.piece_length
    );
    if summary.announce_urls.is_empty() {
        println!("Trackers:     (none)");
    } else {
        for (index, url) in summary.announce_urls.iter().enumerate() {
            let label = if index == 0 { "Trackers:" } else { "" };
            println!("{label:<14}{url}");
        }
    }
    println!("Files ({}):", summary.num_files);
    for file in &summary.files {
        println!("  {} ({} bytes)", file.path, file.length);
    }
    Ok(())
}

/// Writes a `.torrent` for `file`.
///
/// # Errors
/// - File unreadable or empty, or output not writable
pub async fn create(
    file: &Path,
    announce: Vec<String>,
    output: Option<PathBuf>,
    piece_length: u32,
) -> Result<()> {
    let created = DescriptorCreator::with_piece_length(piece_length)
        .create_from_file(file, announce)
        .await
        .with_context(|| format!("Failed to describe {}", file.display()))?;

    let output =
        output.unwrap_or_else(|| PathBuf::from(format!("{}.torrent", created.descriptor.name)));
    tokio::fs::write(&output, &created.bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Created {}", output.display());
    println!("  Info hash: {}", created.descriptor.info_hash);
    println!(
        "  {} bytes in {} pieces",
        created.descriptor.total_length,
        created.descriptor.piece_count()
    );
    Ok(())
}

/// Seeds until Ctrl-C.
///
/// # Errors
/// - Descriptor invalid, engine failed to start, or registration failed
pub async fn seed(
    torrent: &Path,
    data: &Path,
    port: Option<u16>,
    listen_addr: Option<IpAddr>,
) -> Result<()> {
    let bytes = tokio::fs::read(torrent)
        .await
        .with_context(|| format!("Failed to read {}", torrent.display()))?;
    let descriptor = TorrentDescriptor::from_bytes(&bytes)
        .with_context(|| format!("{} is not a valid torrent", torrent.display()))?;

    let selection = port.map_or(PortSelection::WellKnown, PortSelection::Fixed);
    let identity = NetworkIdentity::resolve(selection, listen_addr);
    let engine = SwarmEngineFactory
        .construct(EngineConfig::configure(data, identity, false))
        .await
        .context("Failed to start engine")?;

    let transfer = match engine.register_torrent(descriptor).await {
        Ok(transfer) => transfer,
        Err(e) => {
            engine.close().await;
            return Err(e).context("Failed to register torrent");
        }
    };

    if transfer.bytes_completed() < transfer.total_length() {
        tracing::warn!(
            have = transfer.bytes_completed(),
            total = transfer.total_length(),
            "Data directory holds only part of the torrent"
        );
    }
    println!(
        "Seeding {} on port {} (Ctrl-C to stop)",
        transfer.info_hash(),
        engine.local_port()
    );

    let signal = tokio::signal::ctrl_c().await;
    engine.close().await;
    signal.context("Failed to listen for Ctrl-C")?;
    Ok(())
}
