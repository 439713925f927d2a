//! Ledger snapshot download from a cluster node.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::{StatusCode, header::LOCATION, redirect::Policy};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::{
    fs::FsHandler,
    rpc::{self, ClusterNode},
};

/// Configuration for snapshot downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// RPC endpoint asked for the cluster's nodes.
    pub seed_rpc: String,
    /// Download directory, relative to the repository root unless absolute.
    pub out_dir: PathBuf,
    /// Nodes probed for a snapshot before giving up.
    pub max_probes: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            seed_rpc: crate::DEVNET_RPC_URL.to_string(),
            out_dir: PathBuf::from("snapshots"),
            max_probes: 10,
        }
    }
}

/// Distinct RPC addresses of the nodes that expose one.
pub fn rpc_addresses(nodes: &[ClusterNode]) -> Vec<String> {
    let mut addresses: Vec<String> = nodes.iter().filter_map(|n| n.rpc.clone()).collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

/// Absolute URL of the archive a node redirects to.
pub fn resolve_location(node_url: &Url, location: &str) -> Result<Url> {
    node_url
        .join(location)
        .with_context(|| format!("Invalid snapshot location {location}"))
}

/// File name of the archive behind a snapshot URL.
pub fn snapshot_file_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

pub struct SnapshotDownloader {
    client: reqwest::Client,
}

impl SnapshotDownloader {
    pub fn new() -> Result<Self> {
        // No overall timeout, archives take minutes. Redirects are read, not followed.
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(std::time::Duration::from_secs(3))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// Find a node serving a snapshot and download it into `out_dir`.
    pub async fn download(&self, seed_rpc: &str, out_dir: &Path, max_probes: usize) -> Result<PathBuf> {
        let rpc_client = rpc::create_client()?;
        let nodes = rpc::cluster_nodes(&rpc_client, seed_rpc)
            .await
            .with_context(|| format!("Can't get RPC addresses from {seed_rpc}"))?;
        let addresses = rpc_addresses(&nodes);
        tracing::info!(nodes = nodes.len(), with_rpc = addresses.len(), "Cluster nodes listed");

        for address in addresses.iter().take(max_probes) {
            match self.probe(address).await {
                Ok(Some(archive)) => return self.fetch(&archive, out_dir).await,
                Ok(None) => tracing::debug!(node = %address, "Node serves no snapshot"),
                Err(e) => tracing::debug!(node = %address, err = %format!("{e:#}"), "Snapshot probe failed"),
            }
        }

        anyhow::bail!(
            "None of the {} probed nodes served a snapshot",
            addresses.len().min(max_probes)
        )
    }

    /// HEAD the node's snapshot endpoint and return the archive it redirects to.
    async fn probe(&self, address: &str) -> Result<Option<Url>> {
        let node_url = Url::parse(&format!("http://{address}/"))
            .with_context(|| format!("Invalid node address {address}"))?;
        let snapshot_url = node_url.join("snapshot.tar.bz2")?;
        tracing::info!(url = %snapshot_url, "Requesting snapshot");

        let response = self
            .client
            .head(snapshot_url)
            .timeout(std::time::Duration::from_secs(3))
            .send()
            .await?;

        if !response.status().is_redirection() && response.status() != StatusCode::OK {
            return Ok(None);
        }
        let Some(location) = response.headers().get(LOCATION) else {
            return Ok(None);
        };
        let location = location.to_str().context("Location header is not ASCII")?;

        resolve_location(&node_url, location).map(Some)
    }

    async fn fetch(&self, archive: &Url, out_dir: &Path) -> Result<PathBuf> {
        let name = snapshot_file_name(archive)
            .with_context(|| format!("No file name in {archive}"))?;
        FsHandler::create_dir(out_dir)?;
        let dest = out_dir.join(name);

        let mut response = self
            .client
            .get(archive.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to download {archive}"))?;
        let total = response.content_length();
        tracing::info!(url = %archive, dest = %dest.display(), ?total, "Downloading snapshot...");

        let mut file = tokio::fs::File::create(&dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.context("Snapshot download interrupted")? {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(dest = %dest.display(), bytes = written, "Snapshot downloaded");
        Ok(dest)
    }
}
