//! Local test validator: the foreground launcher and the fresh-state bootstrap.

mod cmd;

use std::{future::Future, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use cmd::TestValidatorCmdBuilder;

use crate::{
    KeyStore, OpsConfig,
    process::{CommandRunner, ToolCommand},
    rpc,
};

/// A program preloaded into the validator at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramBinding {
    /// Address the program is loaded under.
    pub address: String,
    /// Program binary, relative to the repository root.
    pub path: PathBuf,
}

impl ProgramBinding {
    fn new(address: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            address: address.to_string(),
            path: path.into(),
        }
    }
}

/// A pattern painted onto the canvas of a fresh validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPattern {
    pub x_left: i64,
    pub y_bot: i64,
    pub x_right: i64,
    pub y_top: i64,
    /// Directory name under `res/patterns`.
    pub pattern: String,
}

impl SeedPattern {
    fn new(x_left: i64, y_bot: i64, x_right: i64, y_top: i64, pattern: &str) -> Self {
        Self {
            x_left,
            y_bot,
            x_right,
            y_top,
            pattern: pattern.to_string(),
        }
    }
}

/// Configuration for the fresh-validator bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshValidatorConfig {
    /// Builds the canvas program.
    pub build_command: Vec<String>,
    /// Starts a reset local validator in the background.
    pub localnet_command: Vec<String>,
    /// The canvas CLI.
    pub tapestry_cli: String,
    pub owner: String,
    pub buyer: String,
    /// SOL airdropped to both the owner and the buyer.
    pub airdrop_amount: u64,
    /// How long to wait for the validator to report healthy.
    pub ready_timeout_secs: u64,
    pub patterns: Vec<SeedPattern>,
}

impl Default for FreshValidatorConfig {
    fn default() -> Self {
        Self {
            build_command: vec!["yarn".to_string(), "program:build".to_string()],
            localnet_command: vec![
                "yarn".to_string(),
                "localnet:up".to_string(),
                "--reset".to_string(),
            ],
            tapestry_cli: "tap".to_string(),
            owner: "owner".to_string(),
            buyer: "buyer".to_string(),
            airdrop_amount: 1000,
            ready_timeout_secs: 60,
            patterns: vec![
                SeedPattern::new(0, 0, 20, 20, "hello"),
                SeedPattern::new(-8, -8, 0, 0, "chunk_border"),
                SeedPattern::new(-8, 0, 0, 8, "checker"),
            ],
        }
    }
}

/// Configuration for the local test validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub binary: String,
    /// Optional ledger directory, relative to the repository root.
    pub ledger: Option<PathBuf>,
    pub bindings: Vec<ProgramBinding>,
    pub fresh: FreshValidatorConfig,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        let tapestry = PathBuf::from("program/target/deploy");
        let mpl = PathBuf::from("build/custom_deps/mpl-program-library/target/deploy");
        Self {
            binary: "solana-test-validator".to_string(),
            ledger: None,
            bindings: vec![
                ProgramBinding::new(
                    "Tapestry11111111111111111111111111111111111",
                    tapestry.join("solana_tapestry.so"),
                ),
                ProgramBinding::new(
                    "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s",
                    mpl.join("mpl_token_metadata.so"),
                ),
                ProgramBinding::new(
                    "auctxRXPeJoc4817jDhf4HbjnhEcr1cCXenosMhK5R8",
                    mpl.join("mpl_auction.so"),
                ),
                ProgramBinding::new(
                    "hausS13jsjafwWwGqZTUQRmWyvyxn9EQpqMwV1PBBmk",
                    mpl.join("mpl_auction_house.so"),
                ),
                ProgramBinding::new(
                    "vau1zxA2LbssAUEF7Gpw91zMM1LvXrvpzJtmZ58rPsn",
                    mpl.join("mpl_token_vault.so"),
                ),
            ],
            fresh: FreshValidatorConfig::default(),
        }
    }
}

/// Handler for the local test validator.
pub struct TestValidator<'a, R> {
    runner: &'a R,
    config: &'a OpsConfig,
}

impl<'a, R: CommandRunner> TestValidator<'a, R> {
    pub fn new(runner: &'a R, config: &'a OpsConfig) -> Self {
        Self { runner, config }
    }

    /// The validator command with every configured program preloaded.
    pub fn command(&self, reset: bool) -> ToolCommand {
        let root = &self.config.root;
        let validator = &self.config.validator;

        let mut builder = validator
            .bindings
            .iter()
            .fold(TestValidatorCmdBuilder::new(&validator.binary), |b, binding| {
                b.bpf_program(&binding.address, root.join(&binding.path))
            })
            .reset(reset);
        if let Some(ledger) = &validator.ledger {
            builder = builder.ledger(root.join(ledger));
        }

        builder.build().current_dir(root)
    }

    /// Run the validator in the foreground until it exits.
    pub async fn start(&self, reset: bool) -> Result<()> {
        for binding in &self.config.validator.bindings {
            let so = self.config.root.join(&binding.path);
            if !so.exists() {
                tracing::warn!(address = %binding.address, path = %so.display(), "Program binary is missing, the validator will refuse to boot");
            }
        }

        tracing::info!(reset, programs = self.config.validator.bindings.len(), "Starting test validator...");
        self.runner.run(&self.command(reset)).await?;
        Ok(())
    }

    /// Build the program, boot a reset local validator and seed it with accounts, the
    /// canvas state and a few patterns. The validator is stopped afterwards.
    pub async fn fresh(&self) -> Result<()> {
        let client = rpc::create_client()?;
        let url = self.config.networks.localhost.as_str();
        self.fresh_with_probe(|| rpc::check_health(&client, url)).await
    }

    /// [`Self::fresh`] with a custom readiness probe.
    pub async fn fresh_with_probe<F, Fut>(&self, probe: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let fresh = &self.config.validator.fresh;
        let root = &self.config.root;

        let keys = KeyStore::new(self.config.keys_dir());
        keys.ensure_keypair(self.runner, &fresh.buyer).await?;
        keys.ensure_keypair(self.runner, &fresh.owner).await?;

        let build = ToolCommand::from_argv(&fresh.build_command)
            .context("Program build command is empty")?
            .current_dir(root);
        self.runner.run(&build).await?;

        let localnet = ToolCommand::from_argv(&fresh.localnet_command)
            .context("Localnet command is empty")?
            .current_dir(root);
        tracing::info!("Starting and resetting local validator");
        let validator = self.runner.spawn(&localnet)?;
        tracing::info!(pid = ?validator.id(), "Waiting for validator");

        let seeded = async {
            rpc::wait_until_ready(
                "local validator",
                Duration::from_secs(fresh.ready_timeout_secs),
                probe,
            ).await?;
            self.seed(fresh).await
        }
        .await;

        validator.stop().await?;
        seeded?;

        tracing::info!("Fresh validator seeded");
        Ok(())
    }

    async fn seed(&self, fresh: &FreshValidatorConfig) -> Result<()> {
        let tap = |args: &[&str]| {
            ToolCommand::new(&fresh.tapestry_cli)
                .args(["tx"])
                .args(args.iter().copied())
                .current_dir(&self.config.root)
        };

        tracing::info!(amount = fresh.airdrop_amount, "Airdropping SOL");
        let amount = fresh.airdrop_amount.to_string();
        for keyname in [&fresh.owner, &fresh.buyer] {
            self.runner
                .run(&tap(&["airdrop", "--keyname", keyname, "--amount", &amount]))
                .await?;
        }

        tracing::info!("Initializing Tapestry state");
        self.runner.run(&tap(&["init", "--keyname", &fresh.owner])).await?;

        for p in &fresh.patterns {
            let pattern_dir = format!("res/patterns/{}/", p.pattern);
            let cmd = tap(&["fillpattern"])
                .args(["--xLeft".to_string(), p.x_left.to_string()])
                .args(["--yBot".to_string(), p.y_bot.to_string()])
                .args(["--xRight".to_string(), p.x_right.to_string()])
                .args(["--yTop".to_string(), p.y_top.to_string()])
                .args(["--pattern", pattern_dir.as_str()])
                .args(["--keyname", fresh.buyer.as_str()]);
            self.runner.run(&cmd).await?;
        }

        Ok(())
    }
}
