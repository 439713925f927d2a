//! The deploy workflow.
//!
//! The stage order is fixed:
//! Idle -> ResolvingIdentities -> Funding -> (Fetching -> Building) -> Deploying -> Reporting -> Done
//!
//! Funding only does work when an airdrop is requested and Fetching only when the
//! dependencies are rebuilt, but both are always passed through. Any failure moves the
//! workflow to `Failed` and the report keeps the balances observed so far.

use anyhow::Result;
use comfy_table::{Cell, Table};
use solana_sdk::pubkey::Pubkey;

use crate::{
    BalanceOracle, CommitHash, DeployResult, Funder, Identity, KeyStore, Network, OpsConfig,
    OpsError, ProgramDeployer,
    process::CommandRunner,
    services::{CustomDeps, CustomDepsOptions},
};

/// Stage of the deploy workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    Idle,
    ResolvingIdentities,
    Funding,
    Fetching,
    Building,
    Deploying,
    Reporting,
    Done,
    Failed,
}

impl Stage {
    /// Whether the workflow may move from `self` to `next`.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Idle, ResolvingIdentities)
                | (ResolvingIdentities, Funding)
                | (Funding, Fetching)
                | (Funding, Building)
                | (Fetching, Building)
                | (Building, Deploying)
                | (Deploying, Reporting)
                | (Reporting, Done)
        ) || (next == Failed && !matches!(self, Done | Failed))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

/// What to deploy and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployOptions {
    pub network: Network,
    /// The program must already exist on the network.
    pub upgrade: bool,
    /// Fund the authority up to the deploy minimum first.
    pub airdrop: bool,
    /// Fetch and build the third-party dependencies before the program.
    pub with_dependencies: bool,
}

impl DeployOptions {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            upgrade: false,
            airdrop: false,
            with_dependencies: false,
        }
    }
}

/// Outcome of a deploy workflow, printed whether it succeeded or not.
#[derive(Debug)]
pub struct DeployReport {
    pub network: Network,
    /// `Done` or `Failed`.
    pub stage: Stage,
    /// Stage the workflow was in when it failed.
    pub failed_at: Option<Stage>,
    pub program_id: Option<Pubkey>,
    pub authority: Option<Pubkey>,
    pub dependency_commit: Option<CommitHash>,
    pub starting_balance: Option<f64>,
    pub final_balance: Option<f64>,
    pub result: Option<DeployResult>,
    pub error: Option<anyhow::Error>,
}

impl DeployReport {
    fn new(network: Network) -> Self {
        Self {
            network,
            stage: Stage::Idle,
            failed_at: None,
            program_id: None,
            authority: None,
            dependency_commit: None,
            starting_balance: None,
            final_balance: None,
            result: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn cost(&self) -> Option<f64> {
        Some(self.starting_balance? - self.final_balance?)
    }

    /// The deploy result, or the error that stopped the workflow.
    pub fn into_result(self) -> Result<DeployResult> {
        match (self.result, self.error) {
            (_, Some(e)) => Err(e),
            (Some(result), None) => Ok(result),
            (None, None) => anyhow::bail!("Deploy workflow stopped at {}", self.stage),
        }
    }

    /// Human-readable summary.
    pub fn table(&self) -> Table {
        let na = || "-".to_string();
        let sol = |v: Option<f64>| v.map(|v| format!("{v} SOL")).unwrap_or_else(na);
        let stage = match self.failed_at {
            Some(at) => format!("{} (at {at})", self.stage),
            None => self.stage.to_string(),
        };

        let mut table = Table::new();
        table.set_header(vec![Cell::new("Deploy"), Cell::new(self.network)]);
        table.add_row(vec![Cell::new("Stage reached"), Cell::new(stage)]);
        table.add_row(vec![
            Cell::new("Program"),
            Cell::new(self.program_id.map(|p| p.to_string()).unwrap_or_else(na)),
        ]);
        table.add_row(vec![
            Cell::new("Authority"),
            Cell::new(self.authority.map(|p| p.to_string()).unwrap_or_else(na)),
        ]);
        if let Some(commit) = &self.dependency_commit {
            table.add_row(vec![Cell::new("Dependencies"), Cell::new(commit)]);
        }
        table.add_row(vec![Cell::new("Starting balance"), Cell::new(sol(self.starting_balance))]);
        table.add_row(vec![Cell::new("Final balance"), Cell::new(sol(self.final_balance))]);
        table.add_row(vec![Cell::new("Cost"), Cell::new(sol(self.cost()))]);
        if let Some(e) = &self.error {
            table.add_row(vec![Cell::new("Error"), Cell::new(format!("{e:#}"))]);
        }
        table
    }
}

/// Drives a deploy from identity resolution to the final report.
pub struct DeployWorkflow<'a, R> {
    runner: &'a R,
    config: &'a OpsConfig,
    options: DeployOptions,
    report: DeployReport,
    /// Set once identities are resolved.
    authority: Option<Identity>,
}

impl<'a, R: CommandRunner> DeployWorkflow<'a, R> {
    pub fn new(runner: &'a R, config: &'a OpsConfig, options: DeployOptions) -> Self {
        Self {
            runner,
            config,
            options,
            report: DeployReport::new(options.network),
            authority: None,
        }
    }

    /// Run the workflow to completion. Never fails; errors end up in the report.
    pub async fn run(mut self) -> DeployReport {
        match self.drive().await {
            Ok(result) => {
                self.advance(Stage::Reporting);
                self.report.program_id = Some(result.program_id);
                self.report.final_balance = Some(result.final_balance);
                self.report.result = Some(result);
                self.advance(Stage::Done);
            }
            Err(e) => {
                self.settle_balances(&e).await;
                tracing::error!(stage = %self.report.stage, err = %format!("{e:#}"), "Deploy workflow failed");
                self.report.failed_at = Some(self.report.stage);
                self.report.error = Some(e);
                self.advance(Stage::Failed);
            }
        }
        self.report
    }

    /// Fill in the balances of a failed run from what was observed before the failure.
    async fn settle_balances(&mut self, e: &anyhow::Error) {
        match e.downcast_ref::<OpsError>() {
            Some(OpsError::Deploy { report, .. }) => {
                self.report.starting_balance = Some(report.starting_balance);
                self.report.final_balance = Some(report.final_balance);
            }
            Some(OpsError::FundingExhausted { balance, .. }) => {
                self.report.starting_balance.get_or_insert(*balance);
                self.report.final_balance = Some(*balance);
            }
            _ => {
                let Some(authority) = &self.authority else {
                    return;
                };
                let current = BalanceOracle::new(self.runner, &self.config.networks)
                    .check_balance(self.options.network, authority)
                    .await;
                let observed = match current {
                    Ok(balance) => Some(balance),
                    Err(err) => {
                        tracing::warn!(err = %format!("{err:#}"), "Could not re-check the authority balance");
                        self.report.starting_balance
                    }
                };
                self.report.final_balance = observed;
                if self.report.starting_balance.is_none() {
                    self.report.starting_balance = observed;
                }
            }
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.report.stage.can_advance_to(next),
            "invalid transition {} -> {next}",
            self.report.stage
        );
        tracing::debug!(from = %self.report.stage, to = %next, "Deploy workflow stage");
        self.report.stage = next;
    }

    async fn drive(&mut self) -> Result<DeployResult> {
        let (runner, config) = (self.runner, self.config);
        let network = self.options.network;
        let endpoints = &config.networks;
        let deployer = ProgramDeployer::new(runner, endpoints);

        self.advance(Stage::ResolvingIdentities);
        let keys = KeyStore::new(config.keys_dir());
        let program_id = keys.program_id(network)?;
        self.report.program_id = Some(program_id.address);
        let authority = keys.program_authority(network)?;
        self.report.authority = Some(authority.address);
        self.authority = Some(authority.clone());
        tracing::info!(
            %network,
            program_id = %program_id.address,
            authority = %authority.address,
            "Identities resolved"
        );
        if self.options.upgrade {
            deployer.ensure_deployed(network, &program_id).await?;
        }

        self.advance(Stage::Funding);
        let balance = if self.options.airdrop {
            let funding = &config.funding;
            Funder::new(runner, endpoints, &funding.retry)
                .ensure_funded(network, &authority, funding.deploy_minimum, funding.deploy_grant)
                .await?
        } else {
            BalanceOracle::new(runner, endpoints)
                .check_balance(network, &authority)
                .await?
        };
        self.report.starting_balance = Some(balance);

        if self.options.with_dependencies {
            self.advance(Stage::Fetching);
            let deps = CustomDeps::new(runner, config)
                .run(CustomDepsOptions {
                    clean: false,
                    build: true,
                    deploy: true,
                })
                .await?;
            self.report.dependency_commit = Some(deps.commit);
        }

        self.advance(Stage::Building);
        let artifact = deployer
            .build_program(&config.root, network, &config.program, &program_id)
            .await?;

        self.advance(Stage::Deploying);
        let result = deployer.deploy(network, &artifact, &program_id, &authority).await?;
        self.report.starting_balance = Some(result.starting_balance);

        Ok(result)
    }
}
