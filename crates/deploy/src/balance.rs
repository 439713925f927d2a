//! Point-in-time balance queries through the `solana balance` tool.

use anyhow::Result;

use crate::{
    Identity, Network, NetworkEndpoints, OpsError,
    process::{CommandRunner, ToolCommand},
};

/// Reads native-token balances. Every call re-queries the network.
#[derive(Debug)]
pub struct BalanceOracle<'a, R> {
    runner: &'a R,
    endpoints: &'a NetworkEndpoints,
}

impl<R> Clone for BalanceOracle<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for BalanceOracle<'_, R> {}

impl<'a, R: CommandRunner> BalanceOracle<'a, R> {
    pub fn new(runner: &'a R, endpoints: &'a NetworkEndpoints) -> Self {
        Self { runner, endpoints }
    }

    /// Balance of `identity` on `network`, in whole SOL.
    pub async fn check_balance(&self, network: Network, identity: &Identity) -> Result<f64> {
        let address = identity.address.to_string();
        let cmd = ToolCommand::new("solana")
            .args(["balance", address.as_str()])
            .args(["--url", self.endpoints.rpc_url(network)]);

        let query_error = |reason: String| OpsError::BalanceQuery {
            address: address.clone(),
            network: network.to_string(),
            reason,
        };

        let output = self
            .runner
            .run(&cmd)
            .await
            .map_err(|e| query_error(format!("{e:#}")))?;

        let balance = parse_balance(&output.stdout).map_err(query_error)?;

        tracing::debug!(identity = %identity.name, %address, %network, balance, "Balance checked");
        Ok(balance)
    }
}

/// Parse the first whitespace-delimited token of `solana balance` output, e.g. `"1.5 SOL"`.
pub fn parse_balance(stdout: &str) -> Result<f64, String> {
    let token = stdout
        .split_whitespace()
        .next()
        .ok_or_else(|| "empty balance output".to_string())?;
    let balance: f64 = token
        .parse()
        .map_err(|_| format!("unparsable balance `{token}`"))?;
    if !balance.is_finite() {
        return Err(format!("unparsable balance `{token}`"));
    }
    Ok(balance)
}
