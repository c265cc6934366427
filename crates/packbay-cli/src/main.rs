#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use packbay_core::config::{DEFAULT_MODEL_BACKEND, DEFAULT_REGISTRY};
use packbay_core::ProxyConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "packbay")]
#[command(author, version, about = "LAN-local npm registry proxy with docs Q&A", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs to stderr
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Configuration knobs shared by `serve` and `ingest`, each with an
/// environment fallback so a unit file or compose manifest can configure
/// the proxy without flags.
#[derive(clap::Args, Debug, Clone)]
struct ConfigArgs {
    /// Upstream registry base URL
    #[arg(long, env = "PACKBAY_REGISTRY", default_value = DEFAULT_REGISTRY)]
    registry: String,

    /// Directory for cached tarballs and metadata
    #[arg(long, env = "PACKBAY_CACHE_DIR", default_value = "./cache")]
    cache_dir: PathBuf,

    /// Path of the embedded database
    #[arg(long, env = "PACKBAY_DB_PATH", default_value = "./packbay-db")]
    db_path: PathBuf,

    /// Embedding/generation backend base URL
    #[arg(long, env = "PACKBAY_MODEL_BACKEND", default_value = DEFAULT_MODEL_BACKEND)]
    model_backend: String,

    /// Embedding model identifier
    #[arg(long, env = "PACKBAY_EMBED_MODEL", default_value = "nomic-embed-text")]
    embed_model: String,

    /// Generation model identifier
    #[arg(long, env = "PACKBAY_GENERATION_MODEL", default_value = "llama3.2")]
    generation_model: String,

    /// Model backend timeout in seconds
    #[arg(long, env = "PACKBAY_BACKEND_TIMEOUT", default_value_t = 30)]
    backend_timeout: u64,

    /// Embedding cache TTL in seconds
    #[arg(long, env = "PACKBAY_EMBEDDING_TTL", default_value_t = 3_600)]
    embedding_ttl: u64,

    /// Response cache TTL in seconds
    #[arg(long, env = "PACKBAY_RESPONSE_TTL", default_value_t = 86_400)]
    response_ttl: u64,

    /// Chunk window size in chars
    #[arg(long, env = "PACKBAY_CHUNK_SIZE", default_value_t = 800)]
    chunk_size: usize,

    /// Chunk window overlap in chars
    #[arg(long, env = "PACKBAY_CHUNK_OVERLAP", default_value_t = 100)]
    chunk_overlap: usize,

    /// Minimum cosine similarity for semantic retrieval
    #[arg(long, env = "PACKBAY_MIN_SIMILARITY", default_value_t = 0.3)]
    min_similarity: f32,

    /// Weight of the vector score in hybrid ranking
    #[arg(long, env = "PACKBAY_VECTOR_WEIGHT", default_value_t = 0.7)]
    vector_weight: f32,

    /// Weight of the lexical score in hybrid ranking
    #[arg(long, env = "PACKBAY_LEXICAL_WEIGHT", default_value_t = 0.3)]
    lexical_weight: f32,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the proxy server
    Serve {
        /// Listen address
        #[arg(long, env = "PACKBAY_HOST", default_value = "0.0.0.0")]
        host: String,

        /// Listen port
        #[arg(long, env = "PACKBAY_PORT", default_value_t = 4873)]
        port: u16,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Ingest one package's documentation and exit
    Ingest {
        /// Package name
        package: String,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print version information
    Version,
}

impl ConfigArgs {
    fn into_config(self, host: String, port: u16) -> ProxyConfig {
        ProxyConfig {
            registry_url: self.registry,
            cache_dir: self.cache_dir,
            host,
            port,
            db_path: self.db_path,
            model_backend_url: self.model_backend,
            embed_model: self.embed_model,
            generation_model: self.generation_model,
            backend_timeout_secs: self.backend_timeout,
            embedding_ttl_secs: self.embedding_ttl,
            response_ttl_secs: self.response_ttl,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            min_similarity: self.min_similarity,
            vector_weight: self.vector_weight,
            lexical_weight: self.lexical_weight,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Serve { host, port, config } => {
            commands::serve::run(config.into_config(host, port)).await
        }
        Commands::Ingest { package, config } => {
            commands::ingest::run(config.into_config("127.0.0.1".to_string(), 0), &package).await
        }
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
