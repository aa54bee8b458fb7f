// SPDX-License-Identifier: MIT OR Apache-2.0
//! `nirlink` command-line tool
//!
//! - `trace-demo`: trace a built-in spiking network and write the graph
//! - `inspect`: validate a graph file and print its structure
//! - `run`: interpret a graph file and drive it with a constant input

mod demo;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nirlink_bridge::{default_module_map, default_node_map, BridgeConfig, Interpreter, Tracer};
use nirlink_graph::{Graph, GraphFormat};
use nirlink_nn::Tensor;
use std::path::{Path, PathBuf};

/// Trace, inspect and run NIR graphs
#[derive(Parser, Debug)]
#[command(name = "nirlink")]
#[command(version)]
struct Args {
    /// Settings file (RON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output from the conversion crates
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trace the built-in demo network into a graph
    TraceDemo {
        /// Output file (`.json` for JSON, RON otherwise); prints RON when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Wrap the spiking layer in a recurrent feedback loop
        #[arg(long, default_value_t = false)]
        recurrent: bool,
    },

    /// Validate a graph file and print its nodes, edges and call order
    Inspect {
        /// Graph file
        graph: PathBuf,
    },

    /// Interpret a graph file and run it for a number of steps
    Run {
        /// Graph file
        graph: PathBuf,

        /// Number of time steps
        #[arg(short = 'n', long, default_value_t = 10)]
        steps: usize,

        /// Value of every input element
        #[arg(long, default_value_t = 1.0)]
        value: f32,

        /// Input width when the graph does not declare its input shape
        #[arg(short, long)]
        width: Option<usize>,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("nirlink_bridge={level}").parse()?)
        .add_directive(format!("nirlink_graph={level}").parse()?)
        .add_directive(format!("nirlink_nn={level}").parse()?)
        .add_directive(format!("nirlink_cli={level}").parse()?);

    tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load(path).with_context(|| format!("reading settings from {}", path.display())),
        None => Ok(BridgeConfig::default()),
    }
}

fn trace_demo(config: &BridgeConfig, out: Option<&Path>, recurrent: bool) -> Result<()> {
    let net = demo::network(recurrent)?;
    let module_map = default_module_map();
    let mut trace_config = config.trace.clone();
    trace_config.input_shape.get_or_insert_with(|| vec![demo::INPUT_WIDTH]);

    let graph = Tracer::new(&module_map).with_config(trace_config).trace(&net)?;
    match out {
        Some(path) => {
            graph.save(path).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), nodes = graph.node_count(), "graph written");
        }
        None => println!("{}", graph.encode(GraphFormat::Ron)?),
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let graph = Graph::load(path).with_context(|| format!("loading {}", path.display()))?;
    graph.validate()?;
    let order = graph.execution_order(true)?;

    println!("Nodes ({}):", graph.node_count());
    for (name, node) in graph.named_nodes() {
        let shape = |s: Option<&Vec<usize>>| s.map_or_else(|| "?".to_string(), |s| format!("{s:?}"));
        println!(
            "  {name:<16} {:<18} {} -> {}",
            node.tag().to_string(),
            shape(node.input_shape()),
            shape(node.output_shape())
        );
    }
    println!("Edges ({}):", graph.edge_count());
    for edge in graph.edges() {
        let marker = if order.feedback.contains(edge) { " (feedback)" } else { "" };
        println!("  {} -> {}{marker}", edge.source, edge.destination);
    }
    println!("Call order: {}", order.order.join(", "));
    Ok(())
}

fn run(config: &BridgeConfig, path: &Path, steps: usize, value: f32, width: Option<usize>) -> Result<()> {
    let graph = Graph::load(path).with_context(|| format!("loading {}", path.display()))?;
    let shape = match (graph.input_type.first(), width) {
        (_, Some(width)) => vec![width],
        (Some(shape), None) => shape.clone(),
        (None, None) => bail!("graph does not declare its input shape, pass --width"),
    };

    let node_map = default_node_map();
    let exec = Interpreter::new(&node_map)
        .with_config(config.interpret.clone())
        .interpret(&graph)?;
    let inputs = vec![Tensor::full(&shape, value); steps];
    let (outputs, state) = exec.call_sequence(&inputs, None)?;

    for (t, output) in outputs.iter().enumerate() {
        println!("{t:>4}: {:?}", output.data());
    }
    tracing::info!(steps, state = ?state.leaf_paths(), "run complete");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;
    let config = load_config(args.config.as_deref())?;

    match &args.command {
        Commands::TraceDemo { out, recurrent } => trace_demo(&config, out.as_deref(), *recurrent),
        Commands::Inspect { graph } => inspect(graph),
        Commands::Run {
            graph,
            steps,
            value,
            width,
        } => run(&config, graph, *steps, *value, *width),
    }
}
