//! rowgraph CLI: convert SQLite tables into a graph database.
//!
//! Usage:
//!   rowgraph convert --source rows.db --rules rules.yaml [--graph path]
//!   rowgraph stats [--graph path] [--label L] [--type T]

use clap::{Parser, Subcommand};
use rowgraph::{
    load_rules, Converter, ConverterConfig, GraphStore, OpenStore, RunOptions, SqliteGraph, SqliteStream,
    WorkerMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "rowgraph",
    version,
    about = "Convert relational records into a property graph"
)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a conversion
    Convert {
        /// SQLite database holding the input tables
        #[arg(long)]
        source: PathBuf,
        /// Comma separated tables to read (default: all)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        /// Primary key override, as TABLE:COL[,COL...]; repeatable
        #[arg(long = "primary-key")]
        primary_keys: Vec<String>,
        /// YAML rule document
        #[arg(long)]
        rules: PathBuf,
        /// YAML converter settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Path to the graph database file
        #[arg(long)]
        graph: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
        /// One worker, one record per commit
        #[arg(long)]
        serialize: bool,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        flush_size: Option<usize>,
        /// Tune the flush size while running
        #[arg(long)]
        adaptive: bool,
        /// Hand batches to workers as sealed parcels
        #[arg(long)]
        isolated: bool,
        #[arg(long)]
        skip_nodes: bool,
        #[arg(long)]
        skip_relationships: bool,
    },
    /// Count nodes and relationships of a graph database
    Stats {
        /// Path to the graph database file
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Only count nodes with this label
        #[arg(long)]
        label: Option<String>,
        /// Only count relationships of this type
        #[arg(long = "type")]
        rel_type: Option<String>,
    },
}

/// Get the default graph path (~/.local/share/rowgraph/graph.db)
fn default_graph_path() -> PathBuf {
    let data_dir = dirs::data_dir().unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("rowgraph").join("graph.db")
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_primary_key(spec: &str) -> Result<(String, Vec<String>), String> {
    let (table, columns) = spec
        .split_once(':')
        .ok_or_else(|| format!("invalid primary key '{}', expected TABLE:COL[,COL]", spec))?;
    let columns: Vec<String> = columns
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();
    if table.is_empty() || columns.is_empty() {
        return Err(format!("invalid primary key '{}', expected TABLE:COL[,COL]", spec));
    }
    Ok((table.to_string(), columns))
}

struct ConvertArgs {
    source: PathBuf,
    tables: Vec<String>,
    primary_keys: Vec<String>,
    rules: PathBuf,
    config: Option<PathBuf>,
    graph: Option<PathBuf>,
    workers: Option<usize>,
    serialize: bool,
    batch_size: Option<usize>,
    flush_size: Option<usize>,
    adaptive: bool,
    isolated: bool,
    options: RunOptions,
}

fn build_config(args: &ConvertArgs) -> Result<ConverterConfig, String> {
    let mut config = match &args.config {
        Some(path) => ConverterConfig::from_path(path).map_err(|e| e.to_string())?,
        None => ConverterConfig::new(),
    };
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if args.serialize {
        config = config.with_serialize(true);
    }
    if let Some(size) = args.batch_size {
        config = config.with_batch_size(size);
    }
    if let Some(size) = args.flush_size {
        config = config.with_flush_size(size);
    }
    if args.adaptive {
        config = config.with_adaptive_flush(true);
    }
    if args.isolated {
        config = config.with_worker_mode(WorkerMode::Isolated);
    }
    Ok(config)
}

async fn cmd_convert(args: ConvertArgs) -> i32 {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    let rules = match load_rules(&args.rules) {
        Ok(rules) => rules,
        Err(e) => {
            eprintln!("Error: failed to load rules: {}", e);
            return 2;
        }
    };

    let mut builder = SqliteStream::builder(&args.source);
    if !args.tables.is_empty() {
        builder = builder.with_tables(args.tables.iter().cloned());
    }
    for spec in &args.primary_keys {
        match parse_primary_key(spec) {
            Ok((table, columns)) => builder = builder.with_primary_keys(table, columns),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 2;
            }
        }
    }
    let source = match builder.build() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: failed to open source: {}", e);
            return 1;
        }
    };
    info!("Reading tables {:?}", source.tables());

    let graph_path = args.graph.clone().unwrap_or_else(default_graph_path);
    let store = match SqliteGraph::open(&graph_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open graph database: {}", e);
            return 1;
        }
    };

    let mut converter = match Converter::new(config, rules, source, Arc::new(store)) {
        Ok(converter) => converter,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    let cancel = converter.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping workers");
            cancel.cancel();
        }
    });

    match converter.run(args.options).await {
        Ok(summary) => {
            println!(
                "Converted {} resources into {} nodes and {} relationships in {:.1}s",
                summary.counters.resources_seen,
                summary.counters.nodes_committed,
                summary.counters.relationships_committed,
                summary.elapsed.as_secs_f64()
            );
            0
        }
        Err(e) => {
            let counters = converter.counters();
            eprintln!("Error: {}", e);
            eprintln!(
                "Committed before abort: {} resources, {} nodes, {} relationships",
                counters.resources_seen, counters.nodes_committed, counters.relationships_committed
            );
            if !converter.completed_phases().is_empty() {
                eprintln!("Completed phases: {:?}", converter.completed_phases());
            }
            1
        }
    }
}

fn cmd_stats(graph: Option<PathBuf>, label: Option<String>, rel_type: Option<String>) -> i32 {
    let path = graph.unwrap_or_else(default_graph_path);
    if !path.exists() {
        eprintln!("Error: no graph database at {}", path.display());
        return 1;
    }
    let store = match SqliteGraph::open(&path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open graph database: {}", e);
            return 1;
        }
    };
    let counts = store
        .node_count(label.as_deref())
        .and_then(|nodes| Ok((nodes, store.relationship_count(rel_type.as_deref())?)));
    match counts {
        Ok((nodes, relationships)) => {
            println!("nodes: {}", nodes);
            println!("relationships: {}", relationships);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Commands::Convert {
            source,
            tables,
            primary_keys,
            rules,
            config,
            graph,
            workers,
            serialize,
            batch_size,
            flush_size,
            adaptive,
            isolated,
            skip_nodes,
            skip_relationships,
        } => {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("Error: failed to start runtime: {}", e);
                    std::process::exit(1);
                }
            };
            let args = ConvertArgs {
                source,
                tables,
                primary_keys,
                rules,
                config,
                graph,
                workers,
                serialize,
                batch_size,
                flush_size,
                adaptive,
                isolated,
                options: RunOptions {
                    skip_nodes,
                    skip_relationships,
                },
            };
            runtime.block_on(cmd_convert(args))
        }
        Commands::Stats { graph, label, rel_type } => cmd_stats(graph, label, rel_type),
    };
    std::process::exit(code);
}
