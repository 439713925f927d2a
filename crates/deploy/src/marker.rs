use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::CommitHash;

/// Directory, relative to a build output directory, holding the build markers.
pub const MARKERS_DIR: &str = ".markers";

/// Digest of one produced artifact binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    /// Program name, e.g. `mpl_token_metadata`.
    pub program: String,
    /// Hex-encoded SHA-256 of the `.so` file.
    pub sha256: String,
}

impl ArtifactDigest {
    /// Hash the binary at `path`.
    pub fn compute(program: &str, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);

        Ok(Self {
            program: program.to_string(),
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

/// Sentinel recording that the artifacts of a commit have been built.
///
/// Stored as `{build_out}/.markers/{commit}.json`. Its presence alone is what gates a
/// rebuild; the recorded digests are informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMarker {
    /// Commit the artifacts were built from.
    pub commit: String,
    /// Unix timestamp of the build.
    pub built_at: i64,
    /// Version of the tool that wrote the marker.
    pub tool_version: String,
    /// One entry per built program.
    pub artifacts: Vec<ArtifactDigest>,
}

impl BuildMarker {
    pub fn new(commit: &CommitHash, artifacts: Vec<ArtifactDigest>) -> Self {
        Self {
            commit: commit.to_string(),
            built_at: chrono::Utc::now().timestamp(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            artifacts,
        }
    }

    /// Marker path for `commit` under a build output directory.
    pub fn path(build_out: &Path, commit: &CommitHash) -> PathBuf {
        build_out.join(MARKERS_DIR).join(format!("{commit}.json"))
    }

    pub fn exists(build_out: &Path, commit: &CommitHash) -> bool {
        Self::path(build_out, commit).exists()
    }

    /// Names of the programs recorded in the marker.
    pub fn programs(&self) -> impl Iterator<Item = &str> {
        self.artifacts.iter().map(|a| a.program.as_str())
    }

    /// Save this marker, creating the markers directory if needed.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize build marker")?;

        std::fs::write(path, json)
            .with_context(|| format!("Failed to write build marker to {}", path.display()))?;

        Ok(())
    }

    /// Load a marker. Returns an error if the file doesn't exist or is malformed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Build marker does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build marker from {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse build marker JSON")
    }
}
