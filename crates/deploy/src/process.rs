//! External tool invocation.
//!
//! Every tool is launched from a structured argument vector. No shell is involved, so
//! arguments are passed through verbatim whatever characters they contain.

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::OpsError;

/// A single external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: BTreeMap<String, String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: BTreeMap::new(),
        }
    }

    /// Build a command from a full argv. The first element is the program.
    ///
    /// Returns `None` for an empty argv.
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.as_ref()).args(args.iter().map(|a| a.as_ref().to_string())))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn path_arg(self, path: impl AsRef<Path>) -> Self {
        self.arg(path.as_ref().display().to_string())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an extra environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.envs
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Whether the argv starts with the given words, e.g. `["solana", "airdrop"]`.
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        let argv = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        let mut matched = 0;
        for (word, expected) in argv.zip(prefix) {
            if word != *expected {
                return false;
            }
            matched += 1;
        }
        matched == prefix.len()
    }

    /// Value following a `--flag` argument, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(String::as_str)
    }

    fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).envs(&self.envs);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.envs {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`OpsError::ExternalTool`].
    pub fn ensure_success(self, cmd: &ToolCommand) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(OpsError::external_tool(cmd.argv(), self.code, &self.stderr).into())
        }
    }
}

/// A long-running child started with [`CommandRunner::spawn`].
///
/// The process is killed when the handle is dropped.
#[derive(Debug)]
pub struct BackgroundProcess {
    label: String,
    child: Option<tokio::process::Child>,
}

impl BackgroundProcess {
    /// A handle that owns no process, for runners that only record invocations.
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            child: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Kill the process and reap it.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(child) = self.child.as_mut() {
            tracing::debug!(process = %self.label, pid = ?child.id(), "Stopping background process");
            child
                .kill()
                .await
                .with_context(|| format!("Failed to stop {}", self.label))?;
        }
        Ok(())
    }
}

/// Runs external tools.
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and capture its output, whatever the exit status.
    fn execute(&self, cmd: &ToolCommand) -> impl Future<Output = Result<CommandOutput>> + Send;

    /// Start a long-running command without waiting for it.
    fn spawn(&self, cmd: &ToolCommand) -> Result<BackgroundProcess>;

    /// Run the command and fail with [`OpsError::ExternalTool`] on a non-zero exit.
    fn run(&self, cmd: &ToolCommand) -> impl Future<Output = Result<CommandOutput>> + Send {
        async move { self.execute(cmd).await?.ensure_success(cmd) }
    }
}

/// Runs commands as real child processes.
///
/// Output is captured and streamed to the log line by line at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn execute(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        tracing::info!(command = %cmd, "Running command");

        let mut child = cmd
            .to_tokio()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", cmd.program()))?;

        let stdout = child.stdout.take().context("Child stdout was not captured")?;
        let stderr = child.stderr.take().context("Child stderr was not captured")?;

        let (stdout, stderr, status) = tokio::try_join!(
            collect_lines(stdout, cmd.program(), "stdout"),
            collect_lines(stderr, cmd.program(), "stderr"),
            async {
                child
                    .wait()
                    .await
                    .with_context(|| format!("Failed to wait for `{}`", cmd.program()))
            },
        )?;

        tracing::debug!(program = cmd.program(), code = ?status.code(), "Command finished");

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }

    fn spawn(&self, cmd: &ToolCommand) -> Result<BackgroundProcess> {
        tracing::info!(command = %cmd, "Spawning background command");

        let child = cmd
            .to_tokio()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", cmd.program()))?;

        Ok(BackgroundProcess {
            label: cmd.program().to_string(),
            child: Some(child),
        })
    }
}

async fn collect_lines<R: AsyncRead + Unpin>(
    reader: R,
    program: &str,
    stream: &'static str,
) -> Result<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut captured = String::new();
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("Failed to read {stream} of `{program}`"))?
    {
        tracing::debug!(program, stream, "{line}");
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}
