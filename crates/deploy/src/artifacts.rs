//! Marker-gated builds of on-chain program artifacts.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::{
    ArtifactDigest, BuildMarker, CommitHash, OpsError,
    fs::FsHandler,
    process::{CommandRunner, ToolCommand},
};

/// A compiled program and the keypair that fixes its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub program: String,
    pub binary: PathBuf,
    pub keypair: PathBuf,
}

impl Artifact {
    /// The `<program>.so` / `<program>-keypair.json` pair inside `dir`.
    pub fn in_dir(dir: &Path, program: &str) -> Self {
        Self {
            program: program.to_string(),
            binary: dir.join(format!("{program}.so")),
            keypair: dir.join(format!("{program}-keypair.json")),
        }
    }

    pub fn exists(&self) -> bool {
        self.binary.exists() && self.keypair.exists()
    }
}

/// Where cargo leaves deployable artifacts inside a workspace.
pub fn build_output_dir(workspace: &Path) -> PathBuf {
    workspace.join("target").join("deploy")
}

/// Runs the build toolchain in a workspace and installs its artifacts.
pub struct ArtifactBuilder<'a, R> {
    runner: &'a R,
    build_command: &'a [String],
    programs: &'a [String],
}

impl<'a, R: CommandRunner> ArtifactBuilder<'a, R> {
    pub fn new(runner: &'a R, build_command: &'a [String], programs: &'a [String]) -> Self {
        Self {
            runner,
            build_command,
            programs,
        }
    }

    /// Build `workspace` at `commit` unless its marker exists, then install the artifacts
    /// the marker records into `output_dir`.
    ///
    /// A marker recording other programs than the configured ones is stale and fails
    /// with [`OpsError::Build`], as do toolchain failures. Files already copied before a
    /// failure stay in `output_dir`.
    pub async fn ensure_built(
        &self,
        workspace: &Path,
        commit: &CommitHash,
        output_dir: &Path,
    ) -> Result<Vec<Artifact>> {
        let build_out = build_output_dir(workspace);
        let marker = if BuildMarker::exists(&build_out, commit) {
            tracing::info!(%commit, "Artifacts already built for this commit, skipping build");
            let path = BuildMarker::path(&build_out, commit);
            let marker = BuildMarker::load_from_file(&path)?;
            self.check_marker(workspace, commit, &path, &marker)?;
            marker
        } else {
            self.build(workspace, commit).await?
        };

        let recorded: Vec<&str> = marker.programs().collect();
        self.install_programs(workspace, commit, &recorded, output_dir)
    }

    /// Fail unless `marker` records exactly the configured programs.
    fn check_marker(
        &self,
        workspace: &Path,
        commit: &CommitHash,
        path: &Path,
        marker: &BuildMarker,
    ) -> Result<()> {
        let mut recorded: Vec<&str> = marker.programs().collect();
        let mut configured: Vec<&str> = self.programs.iter().map(String::as_str).collect();
        recorded.sort_unstable();
        configured.sort_unstable();

        if recorded != configured {
            return Err(OpsError::Build {
                workspace: workspace.to_path_buf(),
                commit: commit.to_string(),
                reason: format!(
                    "marker {} is stale: it records [{}] but [{}] are configured, clean and rebuild",
                    path.display(),
                    recorded.join(", "),
                    configured.join(", ")
                ),
            }
            .into());
        }
        Ok(())
    }

    /// Run the toolchain and write the marker for `commit`.
    pub async fn build(&self, workspace: &Path, commit: &CommitHash) -> Result<BuildMarker> {
        let build_error = |reason: String| OpsError::Build {
            workspace: workspace.to_path_buf(),
            commit: commit.to_string(),
            reason,
        };

        let cmd = ToolCommand::from_argv(self.build_command)
            .ok_or_else(|| build_error("empty build command".to_string()))?
            .current_dir(workspace);

        tracing::info!(workspace = %workspace.display(), %commit, "Building artifacts...");
        self.runner
            .run(&cmd)
            .await
            .map_err(|e| build_error(format!("{e:#}")))?;

        let build_out = build_output_dir(workspace);
        let mut digests = Vec::with_capacity(self.programs.len());
        for program in self.programs {
            let artifact = Artifact::in_dir(&build_out, program);
            if !artifact.exists() {
                return Err(build_error(format!(
                    "toolchain did not produce {} and {}",
                    artifact.binary.display(),
                    artifact.keypair.display()
                ))
                .into());
            }
            digests.push(ArtifactDigest::compute(program, &artifact.binary)?);
        }

        let marker = BuildMarker::new(commit, digests);
        marker.save_to_file(&BuildMarker::path(&build_out, commit))?;
        tracing::info!(%commit, programs = self.programs.len(), "Build complete");

        Ok(marker)
    }

    /// Copy each program's `(binary, keypair)` pair into `output_dir`.
    pub fn install(&self, workspace: &Path, commit: &CommitHash, output_dir: &Path) -> Result<Vec<Artifact>> {
        self.install_programs(workspace, commit, self.programs, output_dir)
    }

    fn install_programs<S: AsRef<str>>(
        &self,
        workspace: &Path,
        commit: &CommitHash,
        programs: &[S],
        output_dir: &Path,
    ) -> Result<Vec<Artifact>> {
        let build_out = build_output_dir(workspace);
        FsHandler::create_dir(output_dir)?;

        programs
            .iter()
            .map(|program| -> Result<Artifact> {
                let program = program.as_ref();
                let built = Artifact::in_dir(&build_out, program);
                if !built.exists() {
                    return Err(OpsError::Build {
                        workspace: workspace.to_path_buf(),
                        commit: commit.to_string(),
                        reason: format!(
                            "{program} is missing from {}, clean and rebuild",
                            build_out.display()
                        ),
                    }
                    .into());
                }

                FsHandler::copy_into(&built.binary, output_dir)?;
                FsHandler::copy_into(&built.keypair, output_dir)?;
                Ok(Artifact::in_dir(output_dir, program))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::{process::CommandOutput, testing::FakeRunner};

    fn programs() -> Vec<String> {
        vec!["mpl_token_metadata".to_string(), "mpl_auction".to_string()]
    }

    fn build_command() -> Vec<String> {
        vec!["cargo".to_string(), "build-bpf".to_string()]
    }

    /// A toolchain that writes every program into `<cwd>/target/deploy`.
    fn toolchain() -> FakeRunner {
        FakeRunner::new().on(&["cargo", "build-bpf"], |cmd| {
            let out = build_output_dir(cmd.working_dir().unwrap());
            std::fs::create_dir_all(&out).unwrap();
            for program in programs() {
                let artifact = Artifact::in_dir(&out, &program);
                std::fs::write(artifact.binary, format!("elf {program}")).unwrap();
                std::fs::write(artifact.keypair, "[0]").unwrap();
            }
            CommandOutput::success("Finished release")
        })
    }

    fn commit(c: char) -> CommitHash {
        CommitHash::parse(&c.to_string().repeat(40)).unwrap()
    }

    #[tokio::test]
    async fn test_same_commit_builds_once() {
        let workspace = TempDir::new("tapestry-mpl").unwrap();
        let output = TempDir::new("tapestry-deploy").unwrap();
        let runner = toolchain();
        let (cmd, programs) = (build_command(), programs());
        let builder = ArtifactBuilder::new(&runner, &cmd, &programs);

        let first = builder
            .ensure_built(workspace.path(), &commit('a'), output.path())
            .await
            .unwrap();
        let second = builder
            .ensure_built(workspace.path(), &commit('a'), output.path())
            .await
            .unwrap();

        assert_eq!(runner.count(&["cargo", "build-bpf"]), 1);
        assert_eq!(first, second);
        assert!(first.iter().all(Artifact::exists));
        assert_eq!(
            first[0].binary,
            output.path().join("mpl_token_metadata.so")
        );
    }

    #[tokio::test]
    async fn test_different_commits_build_twice_with_two_markers() {
        let workspace = TempDir::new("tapestry-mpl").unwrap();
        let output = TempDir::new("tapestry-deploy").unwrap();
        let runner = toolchain();
        let (cmd, programs) = (build_command(), programs());
        let builder = ArtifactBuilder::new(&runner, &cmd, &programs);

        builder
            .ensure_built(workspace.path(), &commit('a'), output.path())
            .await
            .unwrap();
        builder
            .ensure_built(workspace.path(), &commit('b'), output.path())
            .await
            .unwrap();

        assert_eq!(runner.count(&["cargo", "build-bpf"]), 2);
        let build_out = build_output_dir(workspace.path());
        assert!(BuildMarker::exists(&build_out, &commit('a')));
        assert!(BuildMarker::exists(&build_out, &commit('b')));
    }

    #[tokio::test]
    async fn test_marker_records_digests() {
        let workspace = TempDir::new("tapestry-mpl").unwrap();
        let runner = toolchain();
        let (cmd, programs) = (build_command(), programs());
        let builder = ArtifactBuilder::new(&runner, &cmd, &programs);

        let marker = builder.build(workspace.path(), &commit('c')).await.unwrap();

        assert_eq!(marker.commit, commit('c').to_string());
        assert_eq!(
            marker.programs().collect::<Vec<_>>(),
            ["mpl_token_metadata", "mpl_auction"]
        );
        let saved = BuildMarker::load_from_file(&BuildMarker::path(
            &build_output_dir(workspace.path()),
            &commit('c'),
        ))
        .unwrap();
        assert_eq!(saved, marker);
    }

    #[tokio::test]
    async fn test_removed_outputs_are_restored_without_rebuild() {
        let workspace = TempDir::new("tapestry-mpl").unwrap();
        let output = TempDir::new("tapestry-deploy").unwrap();
        let runner = toolchain();
        let (cmd, programs) = (build_command(), programs());
        let builder = ArtifactBuilder::new(&runner, &cmd, &programs);

        let artifacts = builder
            .ensure_built(workspace.path(), &commit('a'), output.path())
            .await
            .unwrap();
        std::fs::remove_file(&artifacts[1].binary).unwrap();

        let restored = builder
            .ensure_built(workspace.path(), &commit('a'), output.path())
            .await
            .unwrap();

        assert!(restored[1].exists());
        assert_eq!(runner.count(&["cargo", "build-bpf"]), 1);
    }

    #[tokio::test]
    async fn test_marker_hit_installs_recorded_programs() {
        let workspace = TempDir::new("tapestry-mpl").unwrap();
        let output = TempDir::new("tapestry-deploy").unwrap();
        let runner = toolchain();
        let cmd = build_command();
        let built = programs();
        ArtifactBuilder::new(&runner, &cmd, &built)
            .build(workspace.path(), &commit('a'))
            .await
            .unwrap();

        // Same programs in another order: the marker's order wins.
        let reordered = vec!["mpl_auction".to_string(), "mpl_token_metadata".to_string()];
        let artifacts = ArtifactBuilder::new(&runner, &cmd, &reordered)
            .ensure_built(workspace.path(), &commit('a'), output.path())
            .await
            .unwrap();

        let installed: Vec<_> = artifacts.iter().map(|a| a.program.as_str()).collect();
        assert_eq!(installed, ["mpl_token_metadata", "mpl_auction"]);
        assert_eq!(runner.count(&["cargo", "build-bpf"]), 1);
    }

    #[tokio::test]
    async fn test_program_added_after_build_makes_marker_stale() {
        let workspace = TempDir::new("tapestry-mpl").unwrap();
        let output = TempDir::new("tapestry-deploy").unwrap();
        let runner = toolchain();
        let cmd = build_command();
        let before = vec!["mpl_token_metadata".to_string()];
        ArtifactBuilder::new(&runner, &cmd, &before)
            .ensure_built(workspace.path(), &commit('a'), output.path())
            .await
            .unwrap();

        let after = programs();
        let err = ArtifactBuilder::new(&runner, &cmd, &after)
            .ensure_built(workspace.path(), &commit('a'), output.path())
            .await
            .unwrap_err();

        match err.downcast_ref::<OpsError>() {
            Some(OpsError::Build { reason, .. }) => {
                assert!(reason.contains("stale"), "{reason}");
                assert!(reason.contains("mpl_auction"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.count(&["cargo", "build-bpf"]), 1);
        assert!(!output.path().join("mpl_auction.so").exists());
    }

    #[tokio::test]
    async fn test_toolchain_failure_is_a_build_error_without_marker() {
        let workspace = TempDir::new("tapestry-mpl").unwrap();
        let output = TempDir::new("tapestry-deploy").unwrap();
        let runner = FakeRunner::new().on(&["cargo", "build-bpf"], |_| {
            CommandOutput::failure(101, "error[E0425]: cannot find value")
        });
        let (cmd, programs) = (build_command(), programs());
        let builder = ArtifactBuilder::new(&runner, &cmd, &programs);

        let err = builder
            .ensure_built(workspace.path(), &commit('d'), output.path())
            .await
            .unwrap_err();

        match err.downcast_ref::<OpsError>() {
            Some(OpsError::Build { reason, .. }) => assert!(reason.contains("E0425")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!BuildMarker::exists(&build_output_dir(workspace.path()), &commit('d')));
    }

    #[tokio::test]
    async fn test_missing_output_is_a_build_error() {
        let workspace = TempDir::new("tapestry-mpl").unwrap();
        let runner = FakeRunner::new();
        let cmd = build_command();
        let programs = vec!["mpl_token_vault".to_string()];
        let builder = ArtifactBuilder::new(&runner, &cmd, &programs);

        let err = builder.build(workspace.path(), &commit('e')).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<OpsError>(),
            Some(OpsError::Build { reason, .. }) if reason.contains("did not produce")
        ));
    }
}
