use clap::Parser;
use log::LevelFilter;
use mini_gossip::core::config::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_REQUEST_TIMEOUT};
use mini_gossip::utils::setup_logging;
use mini_gossip::{Config, Node, PeerIdentity, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

#[derive(Parser)]
#[command(name = "mini-gossip")]
#[command(about = "A gossip-based P2P node that shares a directory of files")]
#[command(version)]
struct Cli {
    /// Address this node listens on and announces (host:port)
    address: String,
    /// File listing one neighbor (host:port) per line
    neighbors_file: PathBuf,
    /// Directory whose files are offered to other peers
    shared_dir: PathBuf,
    /// Where downloaded files are written (defaults to the shared directory)
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Timeout in seconds for each outbound request
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    timeout: u64,
    /// Largest accepted message line in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,
    /// Log plumbing details
    #[arg(short, long)]
    verbose: bool,
}

type Input = Lines<Box<dyn AsyncBufRead + Unpin + Send>>;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            eprintln!("{}", e);
            process::exit(1);
        }
        Err(e) => e.exit(),
    };

    setup_logging(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let config = Config {
        address: cli.address,
        neighbors_file: cli.neighbors_file,
        shared_dir: cli.shared_dir,
        download_dir: cli.download_dir,
        request_timeout: Duration::from_secs(cli.timeout),
        max_message_size: cli.max_message_size,
    };

    let mut node = match Node::new(config).await {
        Ok(node) => node,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let input: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(BufReader::new(tokio::io::stdin()));
    if let Err(e) = run(&mut node, input.lines()).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(node: &mut Node, mut input: Input) -> Result<()> {
    node.start()?;
    let outcome = menu(node, &mut input).await;
    // Quit, end of input and a broken stdin all leave the network the same way.
    node.shutdown().await?;
    outcome
}

async fn menu(node: &Node, input: &mut Input) -> Result<()> {
    loop {
        print_menu();
        let choice = tokio::select! {
            line = input.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };

        let result = match choice.as_deref().map(str::trim) {
            Some("1") => list_peers(node, input).await,
            Some("2") => {
                let summary = node.discovery().pull_peers().await;
                println!(
                    "{} peers answered, {} unreachable, {} records updated",
                    summary.reachable, summary.unreachable, summary.updated
                );
                Ok(())
            }
            Some("3") => list_local_files(node).await,
            Some("4") => search_and_download(node, input).await,
            Some("5") => list_peer_files(node, input).await,
            Some("9") | None => return Ok(()),
            Some(other) => {
                println!("Unknown option '{}'", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("Command failed: {}", e);
        }
    }
}

fn print_menu() {
    println!();
    println!("Choose a command:");
    println!("  [1] List peers");
    println!("  [2] Get peers");
    println!("  [3] List local files");
    println!("  [4] Search files");
    println!("  [5] List a peer's files");
    println!("  [9] Quit");
    prompt();
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Read an index in `0..=max`; `0` and anything unreadable mean "back".
async fn read_index(input: &mut Input, max: usize) -> Result<Option<usize>> {
    prompt();
    let Some(line) = input.next_line().await? else {
        return Ok(None);
    };
    match line.trim().parse::<usize>() {
        Ok(0) => Ok(None),
        Ok(n) if n <= max => Ok(Some(n)),
        _ => {
            println!("Invalid choice");
            Ok(None)
        }
    }
}

async fn choose_peer(node: &Node, input: &mut Input) -> Result<Option<PeerIdentity>> {
    let records = node.registry().lock().await.list();

    println!("Known peers:");
    println!("  [0] Back");
    for (i, record) in records.iter().enumerate() {
        println!("  [{}] {} {}", i + 1, record.identity, record.state);
    }

    Ok(read_index(input, records.len())
        .await?
        .map(|n| records[n - 1].identity.clone()))
}

async fn list_peers(node: &Node, input: &mut Input) -> Result<()> {
    if let Some(peer) = choose_peer(node, input).await? {
        // The outcome is already logged and recorded in the registry.
        let _ = node.discovery().greet(&peer).await;
    }
    Ok(())
}

async fn list_local_files(node: &Node) -> Result<()> {
    let files = node.files().list_entries().await?;
    if files.is_empty() {
        println!("No files shared from {}", node.files().shared_dir().display());
    }
    for file in files {
        println!("  {} ({} bytes)", file.name, file.size);
    }
    Ok(())
}

async fn search_and_download(node: &Node, input: &mut Input) -> Result<()> {
    let found = node.exchange().search().await;
    if found.is_empty() {
        println!("No files found on online peers");
        return Ok(());
    }

    println!("{:>5}  {:<32} {:>12}  {}", "", "Name", "Size", "Peer");
    println!("  [0] Cancel");
    for (i, record) in found.iter().enumerate() {
        println!(
            "{:>5}  {:<32} {:>12}  {}",
            format!("[{}]", i + 1),
            record.name,
            record.size_bytes,
            record.owner
        );
    }

    if let Some(n) = read_index(input, found.len()).await? {
        let record = &found[n - 1];
        match node.exchange().download(&record.owner, &record.name).await {
            Ok(path) => println!("Saved {}", path.display()),
            Err(e) => println!("Download failed: {}", e),
        }
    }
    Ok(())
}

async fn list_peer_files(node: &Node, input: &mut Input) -> Result<()> {
    if let Some(peer) = choose_peer(node, input).await? {
        match node.exchange().list_remote_files(&peer).await {
            Ok(names) if names.is_empty() => println!("{} shares no files", peer),
            Ok(names) => names.iter().for_each(|name| println!("  {}", name)),
            Err(e) => println!("Could not list files of {}: {}", peer, e),
        }
    }
    Ok(())
}
