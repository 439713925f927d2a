//! Building and publishing the canvas program.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::{
    BalanceOracle, Identity, Network, NetworkEndpoints, OpsError,
    process::{CommandRunner, ToolCommand},
};

/// How the canvas program is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Artifact name, without the `.so` extension.
    pub artifact_name: String,
    /// Environment variable the program reads its own id from at build time.
    pub id_env_var: String,
    /// Cargo feature enabled for devnet builds.
    pub devnet_feature: String,
    /// Build toolchain argv, run from the repository root.
    pub build_command: Vec<String>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            artifact_name: "solana_place".to_string(),
            id_env_var: "SOLANA_PLACE_PROGRAM_ID".to_string(),
            devnet_feature: "devnet".to_string(),
            build_command: vec!["cargo".to_string(), "build-bpf".to_string()],
        }
    }
}

/// Outcome of a deploy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStatus {
    Succeeded,
    Failed(String),
}

/// What a deploy attempt did, reported whether it succeeded or not.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployResult {
    pub network: Network,
    pub program_id: Pubkey,
    pub authority: Identity,
    pub starting_balance: f64,
    pub final_balance: f64,
    pub status: DeployStatus,
}

impl DeployResult {
    /// SOL spent by the authority.
    pub fn cost(&self) -> f64 {
        self.starting_balance - self.final_balance
    }

    pub fn succeeded(&self) -> bool {
        self.status == DeployStatus::Succeeded
    }
}

/// JSON printed by `solana program deploy --output json-compact`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployOutput {
    program_id: String,
}

/// Builds and publishes programs under a fixed program identity.
pub struct ProgramDeployer<'a, R> {
    runner: &'a R,
    endpoints: &'a NetworkEndpoints,
}

impl<'a, R: CommandRunner> ProgramDeployer<'a, R> {
    pub fn new(runner: &'a R, endpoints: &'a NetworkEndpoints) -> Self {
        Self { runner, endpoints }
    }

    /// Build the program for `network` with its id injected, returning the `.so` path.
    pub async fn build_program(
        &self,
        root: &Path,
        network: Network,
        program: &ProgramConfig,
        program_id: &Identity,
    ) -> Result<PathBuf> {
        let out_dir = network.deploy_dir(root);

        let mut cmd = ToolCommand::from_argv(&program.build_command)
            .context("Program build command is empty")?
            .env(&program.id_env_var, program_id.address.to_string())
            .current_dir(root);
        if network == Network::Devnet {
            cmd = cmd.args(["--features", program.devnet_feature.as_str()]);
        }
        cmd = cmd.arg("--bpf-out-dir").path_arg(&out_dir);

        tracing::info!(%network, program_id = %program_id.address, "Building program...");
        self.runner.run(&cmd).await?;

        Ok(out_dir.join(format!("{}.so", program.artifact_name)))
    }

    /// Fail unless `program_id` is already deployed on `network`.
    pub async fn ensure_deployed(&self, network: Network, program_id: &Identity) -> Result<()> {
        self.runner
            .run(
                &ToolCommand::new("solana")
                    .args(["program", "show", &program_id.address.to_string()])
                    .args(["--url", self.endpoints.rpc_url(network)]),
            )
            .await
            .with_context(|| {
                format!(
                    "Program {} is not deployed on {network}, nothing to upgrade",
                    program_id.address
                )
            })?;
        Ok(())
    }

    /// Publish `artifact` under `program_id`, paid and signed by `authority`.
    ///
    /// A failing deploy tool yields [`OpsError::Deploy`] whose report holds the
    /// authority balance observed after the failure.
    pub async fn deploy(
        &self,
        network: Network,
        artifact: &Path,
        program_id: &Identity,
        authority: &Identity,
    ) -> Result<DeployResult> {
        let oracle = BalanceOracle::new(self.runner, self.endpoints);
        let starting_balance = oracle.check_balance(network, authority).await?;

        tracing::info!(
            %network,
            artifact = %artifact.display(),
            program_id = %program_id.address,
            authority = %authority.address,
            starting_balance,
            "Deploying program..."
        );

        let cmd = ToolCommand::new("solana")
            .args(["program", "deploy"])
            .path_arg(artifact)
            .arg("--program-id")
            .path_arg(&program_id.keypath)
            .arg("--keypair")
            .path_arg(&authority.keypath)
            .args(["--url", self.endpoints.rpc_url(network)])
            .args(["--output", "json-compact"]);

        let outcome = self.runner.run(&cmd).await;

        let final_balance = match oracle.check_balance(network, authority).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(err = %format!("{e:#}"), "Could not re-read authority balance, reporting the starting balance");
                starting_balance
            }
        };

        let mut result = DeployResult {
            network,
            program_id: program_id.address,
            authority: authority.clone(),
            starting_balance,
            final_balance,
            status: DeployStatus::Succeeded,
        };

        match outcome {
            Ok(output) => {
                if let Some(reported) = parse_program_id(&output.stdout) {
                    if reported != program_id.address {
                        tracing::warn!(%reported, expected = %program_id.address, "Deploy tool reported a different program id");
                    }
                    result.program_id = reported;
                }
                tracing::info!(program_id = %result.program_id, cost = result.cost(), "Program deployed");
                Ok(result)
            }
            Err(e) => {
                let reason = format!("{e:#}");
                result.status = DeployStatus::Failed(reason.clone());
                Err(OpsError::Deploy {
                    artifact: artifact.to_path_buf(),
                    reason,
                    report: Box::new(result),
                }
                .into())
            }
        }
    }
}

/// Program id from the deploy tool's JSON output. The JSON is the last non-empty line.
fn parse_program_id(stdout: &str) -> Option<Pubkey> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let output: DeployOutput = serde_json::from_str(line.trim()).ok()?;
    output.program_id.parse().ok()
}
