//! A swarm of random walkers painting the canvas concurrently.

use anyhow::Result;
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    Funder, KeyStore, Network, OpsConfig,
    process::{CommandRunner, ToolCommand},
};

/// Configuration for the walker swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Network the walkers are funded on.
    pub network: Network,
    /// SOL airdropped to every walker.
    pub airdrop_amount: f64,
    /// Walkers start at a random position in `0..extent` on both axes.
    pub extent: i64,
    pub default_colors: u32,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            network: Network::Localhost,
            airdrop_amount: 1000.0,
            extent: 1000,
            default_colors: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwarmReport {
    pub walkers: usize,
    pub failed: usize,
}

pub struct Swarm<'a, R> {
    runner: &'a R,
    config: &'a OpsConfig,
}

impl<'a, R: CommandRunner> Swarm<'a, R> {
    pub fn new(runner: &'a R, config: &'a OpsConfig) -> Self {
        Self { runner, config }
    }

    /// Key name of walker `index`.
    pub fn walker_name(index: usize) -> String {
        format!("walker{index}")
    }

    /// Prepare `walkers` funded walkers, then run them all at once and wait for every one.
    pub async fn run(&self, walkers: usize, colors: u32) -> Result<SwarmReport> {
        let swarm = &self.config.swarm;
        let keys = KeyStore::new(self.config.keys_dir());
        let funder = Funder::new(self.runner, &self.config.networks, &self.config.funding.retry);

        let mut commands = Vec::with_capacity(walkers);
        for index in 0..walkers {
            let name = Self::walker_name(index);
            let walker = keys.ensure_keypair(self.runner, &name).await?;
            funder
                .request_grant(swarm.network, &walker, swarm.airdrop_amount)
                .await?;
            commands.push(self.walker_command(&name, colors));
        }

        tracing::info!(walkers, colors, "Releasing the swarm");
        let outcomes = join_all(commands.iter().map(|cmd| self.runner.run(cmd))).await;

        let mut failed = 0;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(_) => tracing::debug!(walker = index, "Walker finished"),
                Err(e) => {
                    failed += 1;
                    tracing::error!(walker = index, err = %format!("{e:#}"), "Walker failed");
                }
            }
        }

        tracing::info!(walkers, failed, "Swarm finished");
        Ok(SwarmReport { walkers, failed })
    }

    fn walker_command(&self, name: &str, colors: u32) -> ToolCommand {
        let extent = self.config.swarm.extent.max(1);
        let mut rng = rand::rng();
        let (x, y) = (rng.random_range(0..extent), rng.random_range(0..extent));

        ToolCommand::new(&self.config.place.cli)
            .args(["tx", "walker"])
            .args(["-x".to_string(), x.to_string()])
            .args(["-y".to_string(), y.to_string()])
            .args(["--keyname", name])
            .args(["--colors".to_string(), colors.to_string()])
            .current_dir(&self.config.root)
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::{process::CommandOutput, testing::FakeRunner};

    fn keygen() -> FakeRunner {
        FakeRunner::new().on(&["solana-keygen", "new"], |cmd| {
            let out = std::path::PathBuf::from(cmd.flag_value("-o").unwrap());
            crate::testing::write_keypair(&out, [4u8; 32]);
            CommandOutput::success("")
        })
    }

    #[tokio::test]
    async fn test_every_walker_is_keyed_funded_and_run() {
        let root = TempDir::new("tapestry-swarm").unwrap();
        let config = OpsConfig::new(root.path());
        let runner = keygen();

        let report = Swarm::new(&runner, &config).run(3, 16).await.unwrap();

        assert_eq!(report, SwarmReport { walkers: 3, failed: 0 });
        assert_eq!(runner.count(&["solana-keygen"]), 3);
        assert_eq!(runner.count(&["solana", "airdrop", "1000"]), 3);

        let walkers: Vec<_> = runner
            .calls()
            .into_iter()
            .filter(|c| c.starts_with(&["pla", "tx", "walker"]))
            .collect();
        assert_eq!(walkers.len(), 3);
        for (i, walker) in walkers.iter().enumerate() {
            assert_eq!(walker.flag_value("--keyname"), Some(format!("walker{i}").as_str()));
            assert_eq!(walker.flag_value("--colors"), Some("16"));
            let x: i64 = walker.flag_value("-x").unwrap().parse().unwrap();
            assert!((0..1000).contains(&x));
        }
    }

    #[tokio::test]
    async fn test_failed_walkers_are_counted() {
        let root = TempDir::new("tapestry-swarm").unwrap();
        let config = OpsConfig::new(root.path());
        let runner = keygen().on(&["pla", "tx", "walker"], |cmd| {
            if cmd.flag_value("--keyname") == Some("walker1") {
                CommandOutput::failure(1, "Error: blockhash not found")
            } else {
                CommandOutput::success("")
            }
        });

        let report = Swarm::new(&runner, &config).run(2, 256).await.unwrap();

        assert_eq!(report, SwarmReport { walkers: 2, failed: 1 });
    }

    #[tokio::test]
    async fn test_existing_keys_are_reused() {
        let root = TempDir::new("tapestry-swarm").unwrap();
        let config = OpsConfig::new(root.path());
        crate::testing::write_keypair(&config.keys_dir().join("walker0.json"), [8u8; 32]);
        let runner = keygen();

        Swarm::new(&runner, &config).run(1, 256).await.unwrap();

        assert_eq!(runner.count(&["solana-keygen"]), 0);
    }
}
