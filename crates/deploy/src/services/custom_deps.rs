//! Third-party on-chain program dependencies, built from a pinned checkout.

use anyhow::Result;

use crate::{
    Artifact, ArtifactBuilder, BuildMarker, CommitHash, DependencyFetcher, OpsConfig,
    artifacts::build_output_dir, fs::FsHandler, process::CommandRunner,
};

/// What a custom-deps run should do after the checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomDepsOptions {
    /// Remove previous build outputs first.
    pub clean: bool,
    /// Build the programs unless the commit was already built.
    pub build: bool,
    /// Copy the built programs into `<root>/target/deploy`.
    pub deploy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDepsReport {
    pub commit: CommitHash,
    /// Installed artifacts, empty unless deploying.
    pub artifacts: Vec<Artifact>,
}

pub struct CustomDeps<'a, R> {
    runner: &'a R,
    config: &'a OpsConfig,
}

impl<'a, R: CommandRunner> CustomDeps<'a, R> {
    pub fn new(runner: &'a R, config: &'a OpsConfig) -> Self {
        Self { runner, config }
    }

    /// Check out the pinned dependency, then clean, build and install as requested.
    ///
    /// Holds the build directory lock for the whole run.
    pub async fn run(&self, options: CustomDepsOptions) -> Result<CustomDepsReport> {
        let _lock = FsHandler::lock_dir(&self.config.build_dir()).await?;

        let dependency = &self.config.dependency;
        let workspace = self.config.mpl_root();
        let fetcher = DependencyFetcher::new(self.runner);

        let commit = fetcher
            .fetch(&dependency.repo_url, &dependency.revision, &workspace)
            .await?;

        if options.clean {
            fetcher.clean(&workspace).await?;
        }

        let builder = ArtifactBuilder::new(
            self.runner,
            &dependency.build_command,
            &dependency.programs,
        );
        let output_dir = self.config.cargo_deploy_dir();

        let artifacts = match (options.build, options.deploy) {
            (true, true) => builder.ensure_built(&workspace, &commit, &output_dir).await?,
            (true, false) => {
                if BuildMarker::exists(&build_output_dir(&workspace), &commit) {
                    tracing::info!(%commit, "Artifacts already built for this commit, skipping build");
                } else {
                    builder.build(&workspace, &commit).await?;
                }
                Vec::new()
            }
            (false, true) => builder.install(&workspace, &commit, &output_dir)?,
            (false, false) => Vec::new(),
        };

        if !artifacts.is_empty() {
            tracing::info!(
                %commit,
                count = artifacts.len(),
                dest = %output_dir.display(),
                "Dependency artifacts installed"
            );
        }

        Ok(CustomDepsReport { commit, artifacts })
    }
}
