mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, graph::GraphSubcommand};
use std::path::PathBuf;
use triage_core::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(
    name = "triage",
    about = "Alert root-cause triage: incident orchestration and procedure deviation detection",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (missing file means defaults)
    #[arg(long, global = true, env = "TRIAGE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Alertmanager webhook server
    Serve {
        /// Address to listen on
        #[arg(long, env = "TRIAGE_LISTEN", default_value = "0.0.0.0:8080")]
        listen: String,
    },

    /// Compare a captured trace file (YAML or JSON) against a reference graph
    Detect {
        /// Reference graph name
        #[arg(long)]
        graph: String,
        /// Trace file: a captured trace or a bare list of events
        trace: PathBuf,
        /// Directory of reference graphs (default: store.graph_dir)
        #[arg(long)]
        graph_dir: Option<PathBuf>,
    },

    /// Inspect reference graphs
    Graph {
        #[command(subcommand)]
        subcommand: GraphSubcommand,
    },

    /// Inspect and validate the config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve { listen } => cmd::serve::run(&cli.config, &listen),
        Commands::Detect {
            graph,
            trace,
            graph_dir,
        } => cmd::detect::run(&cli.config, &graph, &trace, graph_dir, cli.json),
        Commands::Graph { subcommand } => cmd::graph::run(&cli.config, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
