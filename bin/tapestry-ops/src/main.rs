//! tap-ops runs the operator tasks of the Tapestry canvas: program deploys, dependency
//! builds, local validators and a few one-off helpers.

mod cli;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use tapestry_deploy::{
    CONFIG_FILENAME, CustomDeps, CustomDepsOptions, DeployOptions, DeployWorkflow, Mosaic,
    OpsConfig, PlaceInitializer, SnapshotDownloader, Swarm, SystemRunner, TestValidator,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = OpsConfig::load(&cli.root, cli.config.as_deref())?;
    let runner = SystemRunner;

    tracing::debug!(root = %config.root.display(), command = ?cli.command, "Starting");

    match cli.command {
        Command::Deploy(args) => {
            let options = DeployOptions {
                network: args.dest,
                upgrade: args.upgrade,
                airdrop: args.airdrop,
                with_dependencies: args.with_deps,
            };

            let report = DeployWorkflow::new(&runner, &config, options).run().await;
            println!("{}", report.table());
            report.into_result()?;
        }

        Command::InitPlace { owner, network } => {
            let report = PlaceInitializer::new(&runner, &config)
                .init_place(&owner, network)
                .await?;

            println!(
                "{} - now has {} SOL on {network}",
                report.owner.address, report.final_balance
            );
            println!("Total cost was {} SOL", report.cost());
        }

        Command::CustomDeps {
            clean,
            build,
            deploy,
        } => {
            let report = CustomDeps::new(&runner, &config)
                .run(CustomDepsOptions {
                    clean,
                    build,
                    deploy,
                })
                .await?;

            tracing::info!(commit = %report.commit, installed = report.artifacts.len(), "Custom dependencies ready");
        }

        Command::StartTestValidator { reset } => {
            TestValidator::new(&runner, &config).start(reset).await?;
        }

        Command::FreshValidator => {
            TestValidator::new(&runner, &config).fresh().await?;
        }

        Command::Swarm { walkers, colors } => {
            let colors = colors.unwrap_or(config.swarm.default_colors);
            let report = Swarm::new(&runner, &config).run(walkers, colors).await?;

            if report.failed > 0 {
                anyhow::bail!("{} of {} walkers failed", report.failed, report.walkers);
            }
        }

        Command::Snapshot { rpc, out } => {
            let rpc = rpc.unwrap_or_else(|| config.snapshot.seed_rpc.clone());
            let out = config
                .root
                .join(out.unwrap_or_else(|| config.snapshot.out_dir.clone()));

            let path = SnapshotDownloader::new()?
                .download(&rpc, &out, config.snapshot.max_probes)
                .await?;
            println!("{}", path.display());
        }

        Command::Mosaic {
            skip_download,
            bootstrap,
        } => {
            let bootstrap = bootstrap.unwrap_or(config.mosaic.default_bootstrap);
            let path = Mosaic::new(&runner, &config.mosaic)
                .generate(bootstrap, skip_download)
                .await?;
            println!("{}", path.display());
        }

        Command::Config { save } => {
            if save {
                config.save_to_file(&config.root.join(CONFIG_FILENAME))?;
            }
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
