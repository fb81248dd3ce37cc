//! semdex CLI
//!
//! Semantic search over a JSON record catalog.
//!
//! # Usage
//!
//! ```bash
//! # Write the catalog's embeddings to a vector file
//! semdex export --catalog anime.jsonl --output embeddings.vdb
//!
//! # Serve search over the catalog and that file
//! semdex serve --catalog anime.jsonl --vectors embeddings.vdb --port 8080
//!
//! # Ask the running server
//! semdex search --query "0.12,-0.4,0.33" -k 5
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use semdex::catalog::{FieldNames, JsonCatalog};
use semdex::config::{EngineConfig, DEFAULT_SCORE_SCALE};
use semdex::engine::SearchEngine;
use semdex::export::export_embeddings;
use semdex::model::{SearchRequest, SearchResponse};
use semdex::server::serve;
use semdex_core::matrix::{detect_kind, read_matrix, MatrixFile, VectorFileKind};

#[derive(Parser)]
#[command(name = "semdex")]
#[command(about = "Exact cosine search over a JSON record catalog")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct CatalogArgs {
    /// Record catalog (.jsonl, or a .json array)
    #[arg(short, long, env = "SEMDEX_CATALOG")]
    catalog: PathBuf,

    /// Primary id field
    #[arg(long, env = "SEMDEX_ID_FIELD", default_value = "id")]
    id_field: String,

    /// Legacy id field consulted by record lookups
    #[arg(long, env = "SEMDEX_LEGACY_ID_FIELD", default_value = "idMal")]
    legacy_id_field: String,

    /// Field holding each record's embedding
    #[arg(long, env = "SEMDEX_EMBEDDING_FIELD", default_value = "embedding")]
    embedding_field: String,
}

impl CatalogArgs {
    fn open(&self) -> anyhow::Result<JsonCatalog> {
        let fields = FieldNames {
            id: self.id_field.clone(),
            legacy_id: self.legacy_id_field.clone(),
            embedding: self.embedding_field.clone(),
        };
        JsonCatalog::open(&self.catalog, fields)
    }
}

#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Vector file (.vdb or .npy); without it the catalog's embeddings are used
    #[arg(long, env = "SEMDEX_VECTORS")]
    vectors: Option<PathBuf>,

    /// Multiplier applied to cosine similarity in results
    #[arg(long, env = "SEMDEX_SCORE_SCALE", default_value_t = DEFAULT_SCORE_SCALE)]
    score_scale: f32,

    /// Fail the load when ids and vector rows differ by more than this
    #[arg(long, env = "SEMDEX_MAX_LENGTH_SKEW")]
    max_length_skew: Option<usize>,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        let config = match &self.vectors {
            Some(path) => EngineConfig::from_file(path),
            None => EngineConfig::from_catalog(),
        };
        config
            .with_score_scale(self.score_scale)
            .with_max_length_skew(self.max_length_skew)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[command(flatten)]
        catalog: CatalogArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Server port
        #[arg(short, long, env = "SEMDEX_PORT", default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, env = "SEMDEX_HOST", default_value = "0.0.0.0")]
        host: String,
    },

    /// Write the catalog's embeddings to a .vdb file in ascending id order
    Export {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// Output .vdb file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Display statistics about a .vdb or .npy vector file
    Stats {
        /// Path to the vector file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Run one search locally and print the results as JSON
    Query {
        #[command(flatten)]
        catalog: CatalogArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Query vector (comma separated floats)
        #[arg(short, long, value_parser = parse_vector)]
        query: ::std::vec::Vec<f32>,

        /// Number of results
        #[arg(short = 'k', long, default_value = "10")]
        k: usize,
    },

    /// Search through a running server
    Search {
        /// Server URL
        #[arg(long, env = "SEMDEX_SERVER", default_value = "http://localhost:8080")]
        server: String,

        /// Query vector (comma separated floats)
        #[arg(short, long, value_parser = parse_vector)]
        query: ::std::vec::Vec<f32>,

        /// Number of results
        #[arg(short = 'k', long, default_value = "10", allow_negative_numbers = true)]
        k: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            catalog,
            engine,
            port,
            host,
        } => {
            let config = engine.config();
            let store = Arc::new(catalog.open()?);
            let engine = Arc::new(SearchEngine::open(store, config));

            let status = engine.status();
            if !status.as_deref().is_some_and(|s| s.is_ready()) {
                tracing::warn!("Serving without a loaded vector store: {:?}", status);
            }

            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .with_context(|| format!("invalid bind address {}:{}", host, port))?;
            serve(engine, addr).await?;
        }

        Commands::Export { catalog, output } => {
            let store = catalog.open()?;
            let report = export_embeddings(&store, &output)?;
            println!("Exported {} vectors of dimension {} to {:?}", report.rows, report.dim, report.path);
            println!("  Ids: {} ..= {}", report.first_id, report.last_id);
        }

        Commands::Stats { file } => match detect_kind(&file)? {
            VectorFileKind::Vdb => {
                let matrix = MatrixFile::open(&file)?;
                println!("Vector File (.vdb): {:?}", file);
                println!("  Vectors: {}", matrix.rows());
                println!("  Dimensions: {}", matrix.dim());
                println!(
                    "  File Size: {:.2} MB",
                    matrix.memory_bytes() as f64 / (1024.0 * 1024.0)
                );
            }
            VectorFileKind::Npy => {
                let matrix = read_matrix(&file)?;
                println!("Vector File (.npy): {:?}", file);
                println!("  Vectors: {}", matrix.rows());
                println!("  Dimensions: {}", matrix.dim());
                println!(
                    "  Data Size: {:.2} MB",
                    std::mem::size_of_val(matrix.as_slice()) as f64 / (1024.0 * 1024.0)
                );
            }
        },

        Commands::Query {
            catalog,
            engine,
            query,
            k,
        } => {
            let config = engine.config();
            let store = Arc::new(catalog.open()?);
            let engine = SearchEngine::open(store, config);
            let results = engine.search(&query, k)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Search { server, query, k } => {
            let client = reqwest::Client::new();
            let url = format!("{}/search", server.trim_end_matches('/'));

            let request = SearchRequest {
                vector: query,
                top_k: k,
            };

            let response = client.post(&url).json(&request).send().await?;

            if !response.status().is_success() {
                let error: serde_json::Value = response.json().await?;
                eprintln!("Error: {}", error);
                std::process::exit(1);
            }

            let result: SearchResponse = response.json().await?;
            println!(
                "Query time: {:.2}ms (generation {})",
                result.query_time_ms, result.generation
            );
            println!("Results:");
            for res in &result.results {
                let id = res.record.get("id").cloned().unwrap_or_default();
                println!("  ID: {}, Score: {:.2}", id, res.score);
            }
        }
    }

    Ok(())
}

fn parse_vector(s: &str) -> Result<Vec<f32>, String> {
    s.split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| e.to_string()))
        .collect()
}
