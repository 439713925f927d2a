//! Command builder for solana-test-validator.

use std::path::{Path, PathBuf};

use crate::process::ToolCommand;

/// Builder for solana-test-validator commands.
#[derive(Debug, Clone)]
pub struct TestValidatorCmdBuilder {
    binary: String,
    programs: Vec<(String, PathBuf)>,
    ledger: Option<PathBuf>,
    rpc_port: Option<u16>,
    reset: bool,
    extra_args: Vec<String>,
}

impl TestValidatorCmdBuilder {
    /// Create a new builder for `binary`.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            programs: Vec::new(),
            ledger: None,
            rpc_port: None,
            reset: false,
            extra_args: Vec::new(),
        }
    }

    /// Preload the program at `so` under `address`.
    pub fn bpf_program(mut self, address: impl Into<String>, so: impl AsRef<Path>) -> Self {
        self.programs.push((address.into(), so.as_ref().to_path_buf()));
        self
    }

    /// Set the ledger directory.
    pub fn ledger(mut self, path: impl AsRef<Path>) -> Self {
        self.ledger = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the JSON-RPC port.
    pub fn rpc_port(mut self, port: Option<u16>) -> Self {
        self.rpc_port = port;
        self
    }

    /// Start from an empty ledger.
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Add extra arguments.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Build the command.
    pub fn build(self) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.binary);

        for (address, so) in self.programs {
            cmd = cmd.args(["--bpf-program".to_string(), address]).path_arg(so);
        }

        if let Some(ledger) = self.ledger {
            cmd = cmd.arg("--ledger").path_arg(ledger);
        }

        if let Some(port) = self.rpc_port {
            cmd = cmd.args(["--rpc-port".to_string(), port.to_string()]);
        }

        if self.reset {
            cmd = cmd.arg("--reset");
        }

        cmd.args(self.extra_args)
    }
}
