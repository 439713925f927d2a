//! Pinned checkouts of external repositories.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::process::{CommandRunner, ToolCommand};

/// Upstream of the Metaplex program library.
pub const MPL_REPO_URL: &str = "https://github.com/metaplex-foundation/metaplex-program-library.git";
/// `@metaplex-foundation/mpl-metaplex@0.0.2`.
pub const MPL_DEFAULT_REVISION: &str = "5d5cb81fcd4e23e3e51c252a2e2f1ab5c8dc8de9";

/// A revision to check out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Revision {
    /// A full commit hash. Immutable.
    Commit(String),
    /// A tag or branch name. Can move between runs.
    Ref(String),
}

impl Revision {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if is_commit_hash(s) {
            Self::Commit(s.to_ascii_lowercase())
        } else {
            Self::Ref(s.to_string())
        }
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Commit(s) | Self::Ref(s) => s,
        }
    }
}

impl From<String> for Revision {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Revision> for String {
    fn from(r: Revision) -> Self {
        r.as_str().to_string()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved commit, used as the build cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Deref)]
pub struct CommitHash(String);

impl CommitHash {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if !is_commit_hash(s) {
            anyhow::bail!("`{s}` is not a commit hash");
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

fn is_commit_hash(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// The external dependency to fetch and build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub repo_url: String,
    pub revision: Revision,
    /// Programs whose `<name>.so` and `<name>-keypair.json` the build produces.
    pub programs: Vec<String>,
    /// Build toolchain argv, run inside the checkout.
    pub build_command: Vec<String>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            repo_url: MPL_REPO_URL.to_string(),
            revision: Revision::parse(MPL_DEFAULT_REVISION),
            programs: vec!["mpl_token_metadata".to_string()],
            build_command: vec!["cargo".to_string(), "build-bpf".to_string()],
        }
    }
}

/// Clones and checks out pinned revisions.
pub struct DependencyFetcher<'a, R> {
    runner: &'a R,
}

impl<'a, R: CommandRunner> DependencyFetcher<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }

    /// Make `dest` a checkout of `repo_url` at `revision` and return the resolved commit.
    ///
    /// Cloning is skipped when `dest` already holds a repository; a clone failure
    /// reporting that the destination already exists is tolerated.
    pub async fn fetch(&self, repo_url: &str, revision: &Revision, dest: &Path) -> Result<CommitHash> {
        if dest.join(".git").exists() {
            tracing::debug!(dest = %dest.display(), "Repository already cloned");
        } else {
            self.clone_repo(repo_url, dest).await?;
        }

        if revision.is_mutable() {
            tracing::warn!(
                %revision,
                "Dependency is pinned to a mutable ref, builds are not reproducible. Pin a commit hash instead."
            );
        }

        if revision.is_mutable() || !self.is_available(revision, dest).await? {
            tracing::info!(%revision, "Fetching revisions from origin");
            self.runner
                .run(&git(dest).args(["fetch", "--tags", "origin"]))
                .await?;
        }

        self.runner
            .run(&git(dest).args(["checkout", "--quiet", revision.as_str()]))
            .await
            .with_context(|| format!("Failed to check out {revision}"))?;

        let head = self
            .runner
            .run(&git(dest).args(["rev-parse", "HEAD"]))
            .await?;
        let commit = CommitHash::parse(&head.stdout)
            .context("git rev-parse returned an unexpected value")?;

        if let Revision::Commit(pinned) = revision {
            if pinned.as_str() != commit.as_str() {
                anyhow::bail!("Checked out {commit} but {pinned} was pinned");
            }
        }

        tracing::info!(repo = repo_url, %revision, %commit, "Dependency checked out");
        Ok(commit)
    }

    /// Remove build outputs of the checkout, markers included.
    pub async fn clean(&self, dest: &Path) -> Result<()> {
        tracing::info!(dest = %dest.display(), "Cleaning dependency build outputs");
        self.runner
            .run(&ToolCommand::new("cargo").arg("clean").current_dir(dest))
            .await?;
        Ok(())
    }

    async fn clone_repo(&self, repo_url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let cmd = ToolCommand::new("git").args(["clone", repo_url]).path_arg(dest);
        let output = self.runner.execute(&cmd).await?;
        if !output.is_success() {
            if output.stderr.contains("already exists") {
                tracing::warn!(dest = %dest.display(), "Clone target already exists, reusing it");
            } else {
                output.ensure_success(&cmd)?;
            }
        }
        Ok(())
    }

    async fn is_available(&self, revision: &Revision, dest: &Path) -> Result<bool> {
        let output = self
            .runner
            .execute(&git(dest).args([
                "rev-parse",
                "--verify",
                "--quiet",
                &format!("{revision}^{{commit}}"),
            ]))
            .await?;
        Ok(output.is_success())
    }
}

fn git(dest: &Path) -> ToolCommand {
    ToolCommand::new("git").current_dir(PathBuf::from(dest))
}
