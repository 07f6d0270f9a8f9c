#![allow(clippy::print_stderr, clippy::print_stdout, clippy::use_debug)]
use crate::cli::{Args, Command, Input};
use anyhow::{bail, Context};
use clap::Parser;
use oxrdfio::{RdfFormat, RdfParser};
use quadcloud::model::{GraphName, NamedNode, Quad, Term};
use quadcloud::semantic::Bindings;
use quadcloud::{Network, OverlayConfig, QueryResult};
use std::ffi::OsStr;
use std::fs::File;
use std::io::{stdout, BufReader, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

mod cli;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the log subscriber")?;

    let network = start_network(args.peers).await?;
    let result = match args.command {
        Command::Query { input, query } => {
            let quads = read_input(&input)?;
            let added = network.put_get_proxy()?.add_all(quads).await?;
            info!("Loaded {added} quadruples");
            query_network(&network, &query).await
        }
        Command::Subscribe {
            input,
            wait,
            query,
        } => subscribe(&network, &input, &query, Duration::from_millis(wait)).await,
        Command::Topology { input } => {
            let quads = read_input(&input)?;
            network.put_get_proxy()?.add_all(quads).await?;
            print_topology(&network).await
        }
    };
    network.shutdown();
    result
}

async fn start_network(peers: usize) -> anyhow::Result<Network> {
    if peers == 0 {
        bail!("The network needs at least one peer");
    }
    let config = OverlayConfig::semantic().with_maintenance_interval(None);
    let network = Network::bootstrap(config)
        .await
        .context("Failed to bootstrap the network")?;
    for _ in 1..peers {
        network
            .add_peer()
            .await
            .context("Failed to add a peer to the network")?;
    }
    Ok(network)
}

async fn query_network(network: &Network, query: &str) -> anyhow::Result<()> {
    let response = network
        .put_get_proxy()?
        .execute_sparql(query)
        .await
        .with_context(|| format!("Failed to evaluate {query}"))?;
    if !response.complete {
        warn!("Some peers did not answer in time, the result is partial");
    }

    let mut out = stdout().lock();
    match response.result {
        QueryResult::Ask(value) => writeln!(out, "{value}")?,
        QueryResult::Select(solutions) => {
            let header = solutions
                .variables()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            writeln!(out, "{}", header.join("\t"))?;
            for row in &solutions {
                let values = solutions
                    .variables()
                    .iter()
                    .map(|variable| row.get(variable).map(Term::to_string).unwrap_or_default())
                    .collect::<Vec<_>>();
                writeln!(out, "{}", values.join("\t"))?;
            }
        }
        QueryResult::Construct(quads) | QueryResult::Describe(quads) => {
            for quad in quads {
                writeln!(out, "{quad} .")?;
            }
        }
    }
    eprintln!(
        "{} hops out, {} hops back, {:?}",
        response.inbound_hop_count, response.outbound_hop_count, response.latency
    );
    Ok(())
}

async fn subscribe(
    network: &Network,
    input: &Input,
    query: &str,
    wait: Duration,
) -> anyhow::Result<()> {
    let (id, mut notifications) = network
        .subscribe_proxy()?
        .subscribe(query)
        .await
        .with_context(|| format!("Failed to subscribe to {query}"))?;
    info!("Subscribed with {id}");

    let publisher = network.publish_proxy()?;
    for quad in read_input(input)? {
        publisher.publish(quad).await?;
    }

    let mut out = stdout().lock();
    while let Ok(Some(notification)) = tokio::time::timeout(wait, notifications.recv()).await {
        writeln!(out, "{}", format_bindings(&notification.bindings))?;
    }
    Ok(())
}

async fn print_topology(network: &Network) -> anyhow::Result<()> {
    let mut out = stdout().lock();
    for snapshot in network.snapshots().await? {
        let zone = snapshot
            .zone
            .map(|zone| zone.to_string())
            .unwrap_or_default();
        writeln!(
            out,
            "{}\t{}\t{zone}\t{} neighbors\t{} quadruples\t{} subscriptions",
            snapshot.id,
            snapshot.state,
            snapshot.neighbors.len(),
            snapshot.quads,
            snapshot.subscriptions
        )?;
    }
    Ok(())
}

fn format_bindings(bindings: &Bindings) -> String {
    bindings
        .iter()
        .map(|(variable, term)| format!("{variable}={term}"))
        .collect::<Vec<_>>()
        .join("\t")
}

/// Parses the input files. Triples of the default graph are moved to `--graph` or skipped.
fn read_input(input: &Input) -> anyhow::Result<Vec<Quad>> {
    let default_graph = input
        .graph
        .as_deref()
        .map(|graph| {
            NamedNode::new(graph).with_context(|| format!("The graph name {graph} is invalid"))
        })
        .transpose()?;

    let mut quads = Vec::new();
    for path in &input.file {
        let format = match &input.format {
            Some(format) => rdf_format_from_name(format)?,
            None => rdf_format_from_path(path)?,
        };
        let file = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        for quad in RdfParser::from_format(format).for_reader(BufReader::new(file)) {
            let mut quad = quad.with_context(|| format!("Failed to parse {}", path.display()))?;
            if quad.graph_name.is_default_graph() {
                match &default_graph {
                    Some(graph) => quad.graph_name = GraphName::NamedNode(graph.clone()),
                    None => {
                        warn!("Skipping {quad} in the default graph, set --graph to load it");
                        continue;
                    }
                }
            }
            quads.push(quad);
        }
    }
    Ok(quads)
}

fn rdf_format_from_path(path: &Path) -> anyhow::Result<RdfFormat> {
    let Some(ext) = path.extension().and_then(OsStr::to_str) else {
        bail!(
            "The path {} has no extension to guess a file format from",
            path.display()
        )
    };
    RdfFormat::from_extension(ext).with_context(|| format!("The file extension '{ext}' is unknown"))
}

fn rdf_format_from_name(name: &str) -> anyhow::Result<RdfFormat> {
    if let Some(t) = RdfFormat::from_extension(name) {
        return Ok(t);
    }
    if let Some(t) = RdfFormat::from_media_type(name) {
        return Ok(t);
    }
    bail!("The file format '{name}' is unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_is_guessed_from_extension() {
        assert_eq!(
            rdf_format_from_path(Path::new("data.nq")).unwrap(),
            RdfFormat::NQuads
        );
        assert!(rdf_format_from_path(Path::new("data")).is_err());
        assert_eq!(
            rdf_format_from_name("application/trig").unwrap(),
            RdfFormat::TriG
        );
    }

    #[test]
    fn clap_debug() {
        use clap::CommandFactory;

        Args::command().debug_assert()
    }
}
