//! Scripted command runner for unit tests.

use std::sync::Mutex;

use anyhow::Result;

use crate::process::{BackgroundProcess, CommandOutput, CommandRunner, ToolCommand};

type Handler = Box<dyn Fn(&ToolCommand) -> Option<CommandOutput> + Send + Sync>;

/// Answers commands from registered handlers and records every invocation.
///
/// Handlers are tried in registration order; the first one returning `Some` wins.
/// Unhandled commands succeed with empty output.
#[derive(Default)]
pub(crate) struct FakeRunner {
    handlers: Vec<Handler>,
    calls: Mutex<Vec<ToolCommand>>,
    spawned: Mutex<Vec<ToolCommand>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer commands whose argv starts with `prefix`.
    pub(crate) fn on(
        mut self,
        prefix: &[&str],
        handler: impl Fn(&ToolCommand) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        self.handlers.push(Box::new(move |cmd| {
            let prefix: Vec<&str> = prefix.iter().map(String::as_str).collect();
            cmd.starts_with(&prefix).then(|| handler(cmd))
        }));
        self
    }

    pub(crate) fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .count()
    }

    pub(crate) fn spawned(&self) -> Vec<ToolCommand> {
        self.spawned.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeRunner {
    async fn execute(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(cmd.clone());
        Ok(self
            .handlers
            .iter()
            .find_map(|handler| handler(cmd))
            .unwrap_or_else(|| CommandOutput::success("")))
    }

    fn spawn(&self, cmd: &ToolCommand) -> Result<BackgroundProcess> {
        self.spawned.lock().unwrap().push(cmd.clone());
        Ok(BackgroundProcess::detached(cmd.program()))
    }
}

/// Write a keypair file whose public half is `public`.
pub(crate) fn write_keypair(path: &std::path::Path, public: [u8; 32]) {
    let mut bytes = vec![7u8; 32];
    bytes.extend_from_slice(&public);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_string(&bytes).unwrap()).unwrap();
}
