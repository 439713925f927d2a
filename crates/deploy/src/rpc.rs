//! Solana JSON-RPC over HTTP.
//!
//! Only the handful of read-only methods the operator commands need: cluster discovery
//! for snapshots and `getHealth` for local validator readiness.

use std::{future::Future, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

/// Per-request timeout. Cluster RPC nodes are often slow or gone.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const READINESS_POLL: Duration = Duration::from_secs(2);

/// HTTP client shared by the RPC calls of one command.
pub fn create_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build the RPC HTTP client")
}

/// The JSON-RPC 2.0 response envelope. Exactly one of `result` and `error` is set.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    error: Option<RpcFailure>,
}

#[derive(Debug, Deserialize)]
struct RpcFailure {
    code: i64,
    message: String,
}

impl<T> Envelope<T> {
    fn into_result(self, method: &str) -> Result<T> {
        match (self.result, self.error) {
            (_, Some(RpcFailure { code, message })) => {
                anyhow::bail!("{method} failed with RPC error {code}: {message}")
            }
            (Some(result), None) => Ok(result),
            (None, None) => anyhow::bail!("{method} response has neither result nor error"),
        }
    }
}

/// Call `method` on the node at `url`.
///
/// RPC-level errors come back as `Err` with the node's message.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T> {
    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let envelope: Envelope<T> = client
        .post(url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("{method} request to {url} failed"))?
        .json()
        .await
        .with_context(|| format!("{url} sent an unreadable {method} response"))?;

    envelope.into_result(method)
}

/// A validator as listed by `getClusterNodes`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub pubkey: String,
    pub gossip: Option<String>,
    /// `host:port` of the node's JSON-RPC service, if it exposes one.
    pub rpc: Option<String>,
    pub version: Option<String>,
}

pub async fn cluster_nodes(client: &reqwest::Client, url: &str) -> Result<Vec<ClusterNode>> {
    json_rpc_call(client, url, "getClusterNodes", vec![]).await
}

/// Succeeds once the node answers `getHealth` with `ok`.
pub async fn check_health(client: &reqwest::Client, url: &str) -> Result<()> {
    let status: String = json_rpc_call(client, url, "getHealth", vec![]).await?;
    if status != "ok" {
        anyhow::bail!("Node reported health {status}");
    }
    Ok(())
}

/// Poll `probe` until it succeeds, giving up after `timeout`.
///
/// The probe is always tried at least once.
pub async fn wait_until_ready<F, Fut>(name: &str, timeout: Duration, probe: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let polling = async {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match probe().await {
                Ok(()) => return attempt,
                Err(e) => tracing::trace!(service = name, attempt, err = %format!("{e:#}"), "Not ready yet"),
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
    };

    let attempts = tokio::time::timeout(timeout, polling)
        .await
        .map_err(|_| anyhow::anyhow!("Timeout waiting for {name} to be ready after {timeout:?}"))?;
    tracing::debug!(service = name, attempts, "Ready");
    Ok(())
}
