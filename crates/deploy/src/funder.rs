//! Balance-gated funding through airdrop grants.

use std::{
    fmt,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::{
    BalanceOracle, Identity, Network, NetworkEndpoints, OpsError,
    process::{CommandRunner, ToolCommand},
};

/// Retry bounds for funding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingPolicy {
    /// Maximum number of grant requests before giving up.
    pub max_attempts: usize,
    /// Delay before the first re-request, doubled on every further attempt.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between requests.
    pub max_delay_ms: u64,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl FundingPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            // The first request is not a retry.
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Why a single funding attempt did not reach the requirement.
enum Shortfall {
    /// The grant went through but the balance is still too low.
    Short { balance: f64 },
    /// The grant or the re-check failed.
    Failed(anyhow::Error),
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short { balance } => write!(f, "balance still {balance} SOL"),
            Self::Failed(e) => write!(f, "{e:#}"),
        }
    }
}

/// Tops up identities with airdrops until they hold a required balance.
pub struct Funder<'a, R> {
    runner: &'a R,
    endpoints: &'a NetworkEndpoints,
    policy: &'a FundingPolicy,
}

impl<'a, R: CommandRunner> Funder<'a, R> {
    pub fn new(runner: &'a R, endpoints: &'a NetworkEndpoints, policy: &'a FundingPolicy) -> Self {
        Self {
            runner,
            endpoints,
            policy,
        }
    }

    fn oracle(&self) -> BalanceOracle<'a, R> {
        BalanceOracle::new(self.runner, self.endpoints)
    }

    /// Request a single airdrop of `amount` SOL to `identity`.
    pub async fn request_grant(&self, network: Network, identity: &Identity, amount: f64) -> Result<()> {
        tracing::info!(identity = %identity.name, address = %identity.address, amount, %network, "Requesting airdrop");
        self.runner
            .run(
                &ToolCommand::new("solana")
                    .args(["airdrop", &amount.to_string(), &identity.address.to_string()])
                    .args(["--url", self.endpoints.rpc_url(network)])
                    .args(["--commitment", "confirmed"]),
            )
            .await?;
        Ok(())
    }

    /// Make sure `identity` holds at least `minimum_balance` SOL, requesting grants of
    /// `grant_size` until it does.
    ///
    /// Fails with [`OpsError::FundingExhausted`] once the policy's attempts are used up.
    /// On success the returned balance is never below `minimum_balance`.
    pub async fn ensure_funded(
        &self,
        network: Network,
        identity: &Identity,
        minimum_balance: f64,
        grant_size: f64,
    ) -> Result<f64> {
        let oracle = self.oracle();
        let balance = oracle.check_balance(network, identity).await?;
        if balance >= minimum_balance {
            tracing::info!(identity = %identity.name, balance, minimum_balance, "Already funded");
            return Ok(balance);
        }

        let attempts = AtomicUsize::new(0);
        let last_balance = Mutex::new(balance);

        let exhausted = |shortfall: Option<Shortfall>| {
            let last_error = match shortfall {
                Some(Shortfall::Failed(e)) => Some(format!("{e:#}")),
                _ => None,
            };
            let balance = *last_balance.lock().unwrap_or_else(|e| e.into_inner());
            OpsError::FundingExhausted {
                address: identity.address.to_string(),
                attempts: attempts.load(Ordering::SeqCst),
                balance,
                required: minimum_balance,
                last_error,
            }
        };

        if self.policy.max_attempts == 0 {
            return Err(exhausted(None).into());
        }

        let this = self;
        let attempts_ref = &attempts;
        let last_ref = &last_balance;
        let attempt = move || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(identity = %identity.name, attempt, "Funding attempt");

            this.request_grant(network, identity, grant_size)
                .await
                .map_err(Shortfall::Failed)?;

            let balance = oracle
                .check_balance(network, identity)
                .await
                .map_err(Shortfall::Failed)?;
            *last_ref.lock().unwrap_or_else(|e| e.into_inner()) = balance;

            if balance >= minimum_balance {
                Ok::<_, Shortfall>(balance)
            } else {
                Err(Shortfall::Short { balance })
            }
        };

        match attempt
            .retry(self.policy.backoff())
            .notify(|shortfall: &Shortfall, delay: Duration| {
                tracing::warn!(
                    identity = %identity.name,
                    minimum_balance,
                    reason = %shortfall,
                    delay = ?delay,
                    "Not funded yet, retrying"
                );
            })
            .await
        {
            Ok(balance) => {
                tracing::info!(
                    identity = %identity.name,
                    balance,
                    attempts = attempts.load(Ordering::SeqCst),
                    "Funded"
                );
                Ok(balance)
            }
            Err(shortfall) => Err(exhausted(Some(shortfall)).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use solana_sdk::pubkey::Pubkey;

    use super::*;
    use crate::{process::CommandOutput, testing::FakeRunner};

    fn identity() -> Identity {
        Identity {
            name: "owner".to_string(),
            keypath: "/keys/owner.json".into(),
            address: Pubkey::new_from_array([8u8; 32]),
        }
    }

    fn instant_policy(max_attempts: usize) -> FundingPolicy {
        FundingPolicy {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// A ledger where every airdrop credits the requested amount.
    fn faucet(starting: f64) -> FakeRunner {
        let balance = Arc::new(Mutex::new(starting));
        let reader = balance.clone();
        FakeRunner::new()
            .on(&["solana", "balance"], move |_| {
                CommandOutput::success(format!("{} SOL\n", reader.lock().unwrap()))
            })
            .on(&["solana", "airdrop"], move |cmd| {
                let amount: f64 = cmd.arguments()[1].parse().unwrap();
                *balance.lock().unwrap() += amount;
                CommandOutput::success("Signature: 5x\n")
            })
    }

    #[tokio::test]
    async fn test_grants_until_minimum_reached() {
        let runner = faucet(0.0);
        let endpoints = NetworkEndpoints::default();
        let policy = instant_policy(10);
        let funder = Funder::new(&runner, &endpoints, &policy);

        let balance = funder
            .ensure_funded(Network::Localhost, &identity(), 6.0, 3.0)
            .await
            .unwrap();

        assert_eq!(balance, 6.0);
        assert_eq!(runner.count(&["solana", "airdrop"]), 2);
    }

    #[tokio::test]
    async fn test_no_grant_when_already_funded() {
        let runner = faucet(30.0);
        let endpoints = NetworkEndpoints::default();
        let policy = instant_policy(10);
        let funder = Funder::new(&runner, &endpoints, &policy);

        let balance = funder
            .ensure_funded(Network::Devnet, &identity(), 25.0, 3.0)
            .await
            .unwrap();

        assert_eq!(balance, 30.0);
        assert_eq!(runner.count(&["solana", "airdrop"]), 0);
    }

    #[tokio::test]
    async fn test_returned_balance_never_below_minimum() {
        for (start, minimum, grant) in [(0.0, 25.0, 3.0), (1.5, 2.0, 0.25), (9.0, 10.0, 5.0)] {
            let runner = faucet(start);
            let endpoints = NetworkEndpoints::default();
            let policy = instant_policy(200);
            let funder = Funder::new(&runner, &endpoints, &policy);

            let balance = funder
                .ensure_funded(Network::Localhost, &identity(), minimum, grant)
                .await
                .unwrap();
            assert!(balance >= minimum, "{balance} < {minimum}");
        }
    }

    #[tokio::test]
    async fn test_always_failing_faucet_exhausts() {
        let runner = FakeRunner::new()
            .on(&["solana", "balance"], |_| CommandOutput::success("0 SOL"))
            .on(&["solana", "airdrop"], |_| {
                CommandOutput::failure(1, "Error: airdrop request failed. This can happen when the rate limit is reached.")
            });
        let endpoints = NetworkEndpoints::default();
        let policy = instant_policy(4);
        let funder = Funder::new(&runner, &endpoints, &policy);

        let err = funder
            .ensure_funded(Network::Devnet, &identity(), 6.0, 3.0)
            .await
            .unwrap_err();

        match err.downcast_ref::<OpsError>() {
            Some(OpsError::FundingExhausted {
                attempts,
                balance,
                required,
                last_error,
                ..
            }) => {
                assert_eq!(*attempts, 4);
                assert_eq!(*balance, 0.0);
                assert_eq!(*required, 6.0);
                assert!(last_error.as_deref().unwrap().contains("rate limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.count(&["solana", "airdrop"]), 4);
    }

    #[tokio::test]
    async fn test_silent_no_op_faucet_exhausts() {
        let runner = FakeRunner::new()
            .on(&["solana", "balance"], |_| CommandOutput::success("1 SOL"))
            .on(&["solana", "airdrop"], |_| CommandOutput::success(""));
        let endpoints = NetworkEndpoints::default();
        let policy = instant_policy(3);
        let funder = Funder::new(&runner, &endpoints, &policy);

        let err = funder
            .ensure_funded(Network::Localhost, &identity(), 6.0, 3.0)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<OpsError>(),
            Some(OpsError::FundingExhausted { attempts: 3, balance, last_error: None, .. }) if *balance == 1.0
        ));
    }

    #[tokio::test]
    async fn test_grant_targets_identity_address() {
        let runner = faucet(0.0);
        let endpoints = NetworkEndpoints::default();
        let policy = instant_policy(1);
        let funder = Funder::new(&runner, &endpoints, &policy);

        funder
            .ensure_funded(Network::Devnet, &identity(), 2.0, 2.0)
            .await
            .unwrap();

        let grant = runner
            .calls()
            .into_iter()
            .find(|c| c.starts_with(&["solana", "airdrop"]))
            .unwrap();
        assert_eq!(grant.arguments()[1], "2");
        assert_eq!(grant.arguments()[2], identity().address.to_string());
        assert_eq!(grant.flag_value("--url"), Some(endpoints.devnet.as_str()));
        assert_eq!(grant.flag_value("--commitment"), Some("confirmed"));
    }
}
