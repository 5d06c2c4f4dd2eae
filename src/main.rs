//! GossipKV - An Eventually Consistent Key-Value Node
//!
//! This is the main entry point for a GossipKV node.
//! It loads the backend configuration, wires the store to its background
//! tasks, and serves the HTTP API until Ctrl+C.

use gossipkv::bootstrap::{bootstrap, SeedFile};
use gossipkv::config::{load_backend, DEFAULT_CONFIG_PATH};
use gossipkv::queue::{bounded, OverflowPolicy, QueueConfig};
use gossipkv::replication::{GossipConfig, ReplicationAgent, DEFAULT_GOSSIP_INTERVAL, DEFAULT_PEERS};
use gossipkv::storage::{ExpirationMonitor, Store, StoreConfig, DEFAULT_HASH_SPACE, DEFAULT_TTL};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Node configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Address peers know this node by, when it differs from the bind address
    advertise: Option<String>,
    /// Backend configuration file
    config_path: PathBuf,
    /// Every node of the cluster, this one included
    peers: Vec<String>,
    /// Optional tab-separated startup data
    seed_file: Option<PathBuf>,
    /// Time between gossip rounds
    gossip_interval: Duration,
    /// Record lifetime
    ttl: Duration,
    /// Capacity and overflow policy of the access and delete queues
    queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: gossipkv::DEFAULT_HOST.to_string(),
            port: gossipkv::DEFAULT_PORT,
            advertise: None,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            peers: DEFAULT_PEERS.iter().map(|p| p.to_string()).collect(),
            seed_file: None,
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
            ttl: DEFAULT_TTL,
            queue: QueueConfig::default(),
        }
    }
}

/// Returns the value following flag `args[i]`, or exits.
fn flag_value<'a>(args: &'a [String], i: usize) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

/// Parses a whole number of seconds, or exits.
fn parse_seconds(flag: &str, value: &str) -> Duration {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            eprintln!("Error: {} expects a positive number of seconds", flag);
            std::process::exit(1);
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = flag_value(&args, i).to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = flag_value(&args, i).parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--advertise" => {
                    config.advertise = Some(flag_value(&args, i).to_string());
                    i += 2;
                }
                "--config" | "-c" => {
                    config.config_path = PathBuf::from(flag_value(&args, i));
                    i += 2;
                }
                "--peers" => {
                    config.peers = flag_value(&args, i)
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect();
                    i += 2;
                }
                "--seed-file" => {
                    config.seed_file = Some(PathBuf::from(flag_value(&args, i)));
                    i += 2;
                }
                "--gossip-interval" => {
                    config.gossip_interval = parse_seconds(&args[i], flag_value(&args, i));
                    i += 2;
                }
                "--ttl" => {
                    config.ttl = parse_seconds(&args[i], flag_value(&args, i));
                    i += 2;
                }
                "--queue-capacity" => {
                    config.queue.capacity = match flag_value(&args, i).parse::<usize>() {
                        Ok(n) if n > 0 => n,
                        _ => {
                            eprintln!("Error: --queue-capacity expects a positive number");
                            std::process::exit(1);
                        }
                    };
                    i += 2;
                }
                "--queue-overflow" => {
                    config.queue.overflow = flag_value(&args, i)
                        .parse::<OverflowPolicy>()
                        .unwrap_or_else(|e| {
                            eprintln!("Error: {}", e);
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("GossipKV version {}", gossipkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the address this node appears as in the peer list
    fn advertise_address(&self) -> String {
        match &self.advertise {
            Some(addr) => addr.clone(),
            None if self.host == "0.0.0.0" || self.host == "::" => {
                format!("127.0.0.1:{}", self.port)
            }
            None => self.bind_address(),
        }
    }
}

fn print_help() {
    println!(
        r#"
GossipKV - An Eventually Consistent Key-Value Node

USAGE:
    gossipkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 8080)
        --advertise <HOST:PORT>    This node's entry in --peers (default: host:port,
                                   or 127.0.0.1:port when bound to 0.0.0.0)
    -c, --config <PATH>            Backend config file (default: config/config.json)
        --peers <LIST>             Comma-separated host:port of every node
                                   (default: 127.0.0.1:8080,127.0.0.1:8081,127.0.0.1:8082)
        --seed-file <PATH>         Tab-separated key/value rows loaded at startup
        --gossip-interval <SECS>   Seconds between gossip rounds (default: 10)
        --ttl <SECS>               Record lifetime in seconds (default: 5)
        --queue-capacity <N>       Entries per internal queue (default: 1000)
        --queue-overflow <POLICY>  block | drop when a queue is full (default: block)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    gossipkv                       # Node on 127.0.0.1:8080
    gossipkv --port 8081           # Second node of the default cluster
    RUST_LOG=debug gossipkv        # Verbose logging

TALKING TO A NODE:
    $ curl -X POST localhost:8080/insert -d '{{"name": "Ada"}}' -H 'content-type: application/json'
    {{"message":"insert success"}}
    $ curl 'localhost:8080/search?key=name'
    {{"data":"Ada"}}
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Select the storage backend; a bad config file stops the node here
    let backend = load_backend(&config.config_path)?;

    let (access_tx, access_rx) = bounded("access", config.queue);
    let (delete_tx, delete_rx) = bounded("delete", config.queue);

    let store = Arc::new(Store::with_access_queue(
        StoreConfig {
            backend,
            hash_space: DEFAULT_HASH_SPACE,
            ttl: config.ttl,
        },
        access_tx,
    ));
    info!(%backend, ttl_secs = config.ttl.as_secs(), "Store initialized");

    if let Some(path) = &config.seed_file {
        bootstrap(&store, &SeedFile::new(path));
    }

    // Start the background tasks
    let _monitor = ExpirationMonitor::start(Arc::clone(&store), access_rx, delete_tx);
    let _agent = ReplicationAgent::new(
        Arc::clone(&store),
        delete_rx,
        GossipConfig {
            interval: config.gossip_interval,
            local_addr: config.advertise_address(),
            peers: config.peers.clone(),
            ..Default::default()
        },
    )
    .start();

    // Bind the HTTP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("GossipKV v{} listening on {}", gossipkv::VERSION, config.bind_address());

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping node...");
    };

    gossipkv::server::serve(listener, store, shutdown).await?;

    info!("Node shutdown complete");
    Ok(())
}
