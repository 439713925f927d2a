//! Error taxonomy for the operator tooling.
//!
//! Library functions return [`anyhow::Result`]; the failures callers need to tell apart
//! are raised as [`OpsError`] values and can be recovered with
//! `err.downcast_ref::<OpsError>()`.

use std::path::PathBuf;

use thiserror::Error;

use crate::DeployResult;

/// Failures raised by the deployment tooling.
#[derive(Error, Debug)]
pub enum OpsError {
    /// An external tool exited with a non-zero status.
    #[error("`{}` exited with {}: {stderr}", .argv.join(" "), display_code(.code))]
    ExternalTool {
        argv: Vec<String>,
        /// `None` when the process was terminated by a signal.
        code: Option<i32>,
        stderr: String,
    },

    #[error("key file for identity `{name}` not found at {}", .path.display())]
    KeyNotFound { name: String, path: PathBuf },

    #[error("key file {} is not a 64-byte keypair: {reason}", .path.display())]
    KeyFormat { path: PathBuf, reason: String },

    #[error("failed to query the balance of {address} on {network}: {reason}")]
    BalanceQuery {
        address: String,
        network: String,
        reason: String,
    },

    #[error(
        "{address} holds {balance} SOL after {attempts} grant attempts, {required} SOL required{}",
        .last_error.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default()
    )]
    FundingExhausted {
        address: String,
        attempts: usize,
        balance: f64,
        required: f64,
        last_error: Option<String>,
    },

    #[error("build of {} at {commit} failed: {reason}", .workspace.display())]
    Build {
        workspace: PathBuf,
        commit: String,
        reason: String,
    },

    /// The deploy tool failed. The report still carries the observed balances.
    #[error("deploy of {} failed: {reason}", .artifact.display())]
    Deploy {
        artifact: PathBuf,
        reason: String,
        report: Box<DeployResult>,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

impl OpsError {
    /// Trimmed stderr tail kept on [`OpsError::ExternalTool`].
    pub(crate) const STDERR_TAIL: usize = 2048;

    pub(crate) fn external_tool(argv: Vec<String>, code: Option<i32>, stderr: &str) -> Self {
        let stderr = stderr.trim();
        let start = stderr
            .char_indices()
            .rev()
            .nth(Self::STDERR_TAIL - 1)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        Self::ExternalTool {
            argv,
            code,
            stderr: stderr[start..].to_string(),
        }
    }
}
