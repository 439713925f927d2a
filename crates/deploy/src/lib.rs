//! tapestry-deploy - Operator tooling for the Tapestry canvas program.
//!
//! This crate builds, funds and deploys the on-chain program and its third-party
//! dependencies by orchestrating the Solana command-line tools, and hosts the smaller
//! operator commands (local validator, walker swarm, snapshots, mosaic).

mod artifacts;
pub use artifacts::{Artifact, ArtifactBuilder, build_output_dir};

mod balance;
pub use balance::{BalanceOracle, parse_balance};

mod config;
pub use config::{CONFIG_FILENAME, ENV_PREFIX, FundingConfig, OpsConfig};

mod error;
pub use error::OpsError;

mod fetcher;
pub use fetcher::{
    CommitHash, DependencyConfig, DependencyFetcher, MPL_DEFAULT_REVISION, MPL_REPO_URL, Revision,
};

pub mod fs;

mod funder;
pub use funder::{Funder, FundingPolicy};

mod keys;
pub use keys::{Identity, KEYPAIR_LEN, KeyStore, address_from_keyfile, address_from_keypair_json};

mod marker;
pub use marker::{ArtifactDigest, BuildMarker, MARKERS_DIR};

mod network;
pub use network::{DEVNET_RPC_URL, LOCALHOST_RPC_URL, Network, NetworkEndpoints};

pub mod process;
pub use process::{BackgroundProcess, CommandOutput, CommandRunner, SystemRunner, ToolCommand};

mod program;
pub use program::{DeployResult, DeployStatus, ProgramConfig, ProgramDeployer};

pub mod rpc;
pub mod services;

pub use services::{
    CustomDeps, CustomDepsOptions, CustomDepsReport, FreshValidatorConfig, InitPlaceReport, Mosaic,
    MosaicConfig, PlaceConfig, PlaceInitializer, ProgramBinding, SeedPattern, SnapshotConfig,
    SnapshotDownloader, Swarm, SwarmConfig, SwarmReport, TestValidator, TestValidatorCmdBuilder,
    ValidatorConfig,
};

mod workflow;
pub use workflow::{DeployOptions, DeployReport, DeployWorkflow, Stage};

#[cfg(test)]
mod testing;
