use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about, version, name = "quadcloud")]
/// QuadCloud command line toolkit running an in-process network of peers
pub struct Args {
    /// Number of peers of the network
    #[arg(short, long, global = true, default_value_t = 8)]
    pub peers: usize,
    /// Maximum level of the log messages written to stderr
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: tracing::Level,
    #[command(subcommand)]
    pub command: Command,
}

/// The RDF files loaded into the network before the command runs.
#[derive(clap::Args)]
pub struct Input {
    /// File(s) to load
    #[arg(short, long, num_args = 0.., value_hint = ValueHint::FilePath)]
    pub file: Vec<PathBuf>,
    /// The format of the file(s) to load
    ///
    /// It can be an extension like "nq" or a MIME type like "application/n-quads".
    ///
    /// By default the format is guessed from the file extensions.
    #[arg(long)]
    pub format: Option<String>,
    /// Name of the graph to put the triples of the default graph in
    ///
    /// Quadruples must belong to a named graph, so triples in the default graph are skipped if
    /// this is not set.
    #[arg(long, value_hint = ValueHint::Url)]
    pub graph: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load files and evaluate a SPARQL query
    Query {
        #[command(flatten)]
        input: Input,
        /// The SPARQL query. Its pattern must be a single GRAPH block
        query: String,
    },
    /// Subscribe to a SPARQL query, publish files and print the notifications
    Subscribe {
        #[command(flatten)]
        input: Input,
        /// How long to wait for notifications after publishing, in milliseconds
        #[arg(long, default_value_t = 500)]
        wait: u64,
        /// The SPARQL query. Its pattern must be a single GRAPH block
        query: String,
    },
    /// Load files and print the zones of the peers
    Topology {
        #[command(flatten)]
        input: Input,
    },
}
