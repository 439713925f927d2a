use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tapestry_deploy::Network;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "tap-ops")]
#[command(author, version, about = "Operator tooling for the Tapestry canvas program")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "TAPESTRY_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Root of the Tapestry repository. Keys, builds and artifacts live under it.
    #[arg(long, env = "TAPESTRY_ROOT")]
    pub root: PathBuf,

    /// Path to a configuration file.
    ///
    /// Defaults to `Tapestry.toml` in the repository root when it exists. Values can also
    /// be overridden with `TAPESTRY_<SECTION>__<KEY>` environment variables.
    #[arg(long, alias = "conf", env = "TAPESTRY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the canvas program and deploy it.
    Deploy(DeployArgs),

    /// Fund the owner and initialize the place state, mint and patches.
    InitPlace {
        /// Key name of the identity that will own the place.
        #[arg(long)]
        owner: String,

        #[arg(long)]
        network: Network,
    },

    /// Fetch, build and install the pinned Metaplex programs.
    CustomDeps {
        /// Remove previous build outputs first.
        #[arg(long)]
        clean: bool,

        /// Build the programs. Skipped when the pinned commit was already built.
        #[arg(long)]
        build: bool,

        /// Copy the built programs into `<root>/target/deploy`.
        #[arg(long)]
        deploy: bool,
    },

    /// Run a local test validator with the canvas and Metaplex programs preloaded.
    StartTestValidator {
        /// Start from an empty ledger.
        #[arg(long)]
        reset: bool,
    },

    /// Boot a reset local validator and seed it with accounts, state and patterns.
    FreshValidator,

    /// Run random walkers painting the canvas concurrently.
    Swarm {
        /// Number of walkers to run.
        #[arg(long)]
        walkers: usize,

        /// Number of colors each walker cycles through.
        #[arg(long)]
        colors: Option<u32>,
    },

    /// Download a ledger snapshot from a cluster node.
    Snapshot {
        /// RPC endpoint listing the cluster nodes.
        #[arg(long)]
        rpc: Option<String>,

        /// Download directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Generate a big random mosaic image.
    Mosaic {
        /// Reuse previously downloaded tiles.
        #[arg(long, alias = "skip_download")]
        skip_download: bool,

        /// Source tile size factor.
        #[arg(long)]
        bootstrap: Option<u32>,
    },

    /// Print the effective configuration.
    Config {
        /// Also write it to `<root>/Tapestry.toml`.
        #[arg(long)]
        save: bool,
    },
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// The network to deploy to.
    #[arg(long, default_value_t = Network::Localhost)]
    pub dest: Network,

    /// Upgrade an existing deployment. Fails if the program is not deployed yet.
    #[arg(long)]
    pub upgrade: bool,

    /// Airdrop SOL to the program authority until it holds the deploy minimum.
    #[arg(long)]
    pub airdrop: bool,

    /// Fetch and build the Metaplex programs before the canvas program.
    #[arg(long)]
    pub with_deps: bool,
}
