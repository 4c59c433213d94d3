use anyhow::{bail, Context, Result};
use bson::{Bson, Document, RawDocumentBuf};
use clap::{Parser, Subcommand};
use mongowire::config::{Config, ConfigError, LoggingConfig, ServerConfig};
use mongowire::protocol::QueryOptions;
use mongowire::utils::{format_bytes, format_duration};
use mongowire::Connection;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mongowire")]
#[command(about = "Client for MongoDB servers and replica sets over the legacy wire protocol")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "mongowire team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print the server's ismaster document
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/mongowire.toml")]
        config: PathBuf,
    },
    /// Run a query and print matching documents as JSON
    Find {
        #[arg(short, long, default_value = "config/mongowire.toml")]
        config: PathBuf,
        /// Namespace as `db.collection`
        #[arg(long)]
        ns: String,
        /// Query document as JSON
        #[arg(short, long, default_value = "{}")]
        query: String,
        /// Maximum number of documents; 0 for all
        #[arg(short, long, default_value_t = 0)]
        limit: i32,
        #[arg(short, long, default_value_t = 0)]
        skip: i32,
    },
    /// Count documents matching a query
    Count {
        #[arg(short, long, default_value = "config/mongowire.toml")]
        config: PathBuf,
        #[arg(long)]
        db: String,
        #[arg(long)]
        collection: String,
        /// Query document as JSON
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Generate example configuration files
    Config {
        /// Configuration mode (single or replica_set)
        #[arg(short, long)]
        mode: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status { config } => status(&config),
        Commands::Find {
            config,
            ns,
            query,
            limit,
            skip,
        } => find(&config, &ns, &query, limit, skip),
        Commands::Count {
            config,
            db,
            collection,
            query,
        } => count(&config, &db, &collection, query.as_deref()),
        Commands::Config { mode, output } => generate_config(&mode, &output),
        Commands::Validate { config } => validate_config(&config),
        Commands::Version => {
            show_version();
            Ok(())
        }
    }
}

/// Load configuration, install logging and connect
fn connect(config_path: &Path) -> Result<Connection> {
    let config = Config::load_from_file(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(&config.logging);
    info!("Configuration loaded from: {:?}", config_path);

    let mut conn = Connection::from_config(&config)?;
    conn.open()
        .with_context(|| format!("Failed to connect ({:?})", config.server))?;
    if let Some(primary) = conn.primary() {
        info!("Connected to {}", primary);
    }
    Ok(conn)
}

fn status(config_path: &Path) -> Result<()> {
    let mut conn = connect(config_path)?;

    let started = Instant::now();
    let reply = conn.run_command("admin", &bson::rawdoc! { "ismaster": 1 })?;
    let elapsed = started.elapsed();

    println!("{}", to_json(reply)?);
    println!("Round trip: {}", format_duration(elapsed));
    if let Some(rs) = conn.replica_set_state() {
        println!("Replica set members: {}", rs.hosts().len());
        for (i, host) in rs.hosts().iter().enumerate() {
            println!("  {}: {}", i + 1, host);
        }
    }
    Ok(())
}

fn find(config_path: &Path, ns: &str, query: &str, limit: i32, skip: i32) -> Result<()> {
    let query = parse_query(query)?;
    let mut conn = connect(config_path)?;

    let mut cursor = conn.find(ns, &query, None, limit, skip, QueryOptions::empty())?;
    let mut bytes = 0u64;
    while cursor.advance() {
        if let Some(doc) = cursor.current() {
            bytes += doc.as_bytes().len() as u64;
            println!("{}", to_json(Document::try_from(doc)?)?);
        }
    }
    let returned = cursor.returned();
    drop(cursor);

    if let Some(err) = conn.last_error() {
        bail!("Query stopped early: {} ({})", err.message, err.kind);
    }
    eprintln!("{} documents, {}", returned, format_bytes(bytes));
    Ok(())
}

fn count(config_path: &Path, db: &str, collection: &str, query: Option<&str>) -> Result<()> {
    let query = query.map(parse_query).transpose()?;
    let mut conn = connect(config_path)?;

    match conn.count(db, collection, query.as_deref())? {
        Some(n) => println!("{}", n),
        None => bail!("Server reported a failure counting {}.{}", db, collection),
    }
    Ok(())
}

fn parse_query(json: &str) -> Result<RawDocumentBuf> {
    let value: serde_json::Value = serde_json::from_str(json).context("Query is not valid JSON")?;
    match Bson::try_from(value)? {
        Bson::Document(doc) => Ok(RawDocumentBuf::from_document(&doc)?),
        other => bail!("Query must be a JSON object, got {}", other),
    }
}

fn to_json(doc: Document) -> Result<String> {
    Ok(serde_json::to_string(
        &Bson::Document(doc).into_relaxed_extjson(),
    )?)
}

fn generate_config(mode: &str, output: &Path) -> Result<()> {
    println!("Generating {} configuration file: {:?}", mode, output);

    Config::create_example_config(output, mode).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  mongowire status --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            match &config.server {
                ServerConfig::Single { host, port } => {
                    println!("  Mode: single");
                    println!("  Server: {}:{}", host, port);
                }
                ServerConfig::ReplicaSet { name, seeds } => {
                    println!("  Mode: replica_set");
                    println!("  Set name: {}", name.as_deref().unwrap_or("(any)"));
                    println!("  Seeds: {} hosts", seeds.len());
                    for (i, seed) in seeds.iter().enumerate() {
                        println!("    {}: {}", i + 1, seed);
                    }
                }
            }
            println!("  Connect timeout: {} ms", config.connection.connect_timeout_ms);
            println!("  Operation timeout: {} ms", config.connection.op_timeout_ms);
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("mongowire v{}", env!("CARGO_PKG_VERSION"));
    println!("Client for MongoDB servers and replica sets over the legacy wire protocol");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Single-server and replica set connections with primary discovery");
    println!("  • Streaming cursors with get-more batching");
    println!("  • Legacy nonce/digest authentication");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.format.as_str() {
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}
