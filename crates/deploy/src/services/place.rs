//! On-chain initialization of the place state.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    BalanceOracle, Funder, Identity, KeyStore, Network, OpsConfig,
    process::{CommandRunner, ToolCommand},
};

/// Configuration for the place CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceConfig {
    /// The place CLI binary.
    pub cli: String,
    /// Transactions run, in order, to initialize a place.
    pub init_transactions: Vec<String>,
}

impl Default for PlaceConfig {
    fn default() -> Self {
        Self {
            cli: "pla".to_string(),
            init_transactions: vec![
                "update_place".to_string(),
                "initmint".to_string(),
                "initpatches".to_string(),
            ],
        }
    }
}

/// Balances around a place initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct InitPlaceReport {
    pub owner: Identity,
    pub network: Network,
    pub starting_balance: f64,
    pub final_balance: f64,
}

impl InitPlaceReport {
    pub fn cost(&self) -> f64 {
        self.starting_balance - self.final_balance
    }
}

pub struct PlaceInitializer<'a, R> {
    runner: &'a R,
    config: &'a OpsConfig,
}

impl<'a, R: CommandRunner> PlaceInitializer<'a, R> {
    pub fn new(runner: &'a R, config: &'a OpsConfig) -> Self {
        Self { runner, config }
    }

    /// Fund `owner` and initialize the place, mint and patches with it.
    pub async fn init_place(&self, owner: &str, network: Network) -> Result<InitPlaceReport> {
        let owner = KeyStore::new(self.config.keys_dir()).identity(owner)?;
        let funding = &self.config.funding;

        let starting_balance = Funder::new(self.runner, &self.config.networks, &funding.retry)
            .ensure_funded(
                network,
                &owner,
                funding.init_place_minimum,
                funding.init_place_grant,
            )
            .await?;
        tracing::info!(address = %owner.address, balance = starting_balance, %network, "Owner funded");

        for tx in &self.config.place.init_transactions {
            let cmd = ToolCommand::new(&self.config.place.cli)
                .args(["tx", tx.as_str(), "--keyname", owner.name.as_str()])
                .current_dir(&self.config.root);
            self.runner.run(&cmd).await?;
        }

        let final_balance = BalanceOracle::new(self.runner, &self.config.networks)
            .check_balance(network, &owner)
            .await?;

        let report = InitPlaceReport {
            owner,
            network,
            starting_balance,
            final_balance,
        };
        tracing::info!(
            address = %report.owner.address,
            final_balance,
            cost = report.cost(),
            "Place initialized"
        );
        Ok(report)
    }
}
