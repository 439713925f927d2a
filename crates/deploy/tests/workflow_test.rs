//! End-to-end tests for tapestry-deploy.
//!
//! The deploy workflow runs against a scripted toolchain that imitates git, cargo and the
//! Solana CLI on a temporary repository root. The fetcher tests use the real `git` binary
//! on local repositories and are skipped when it is not installed.
//! Run with: cargo test --test workflow_test

use std::{
    path::{Path, PathBuf},
    process::Command,
    sync::Mutex,
};

use anyhow::Result;
use tapestry_deploy::{
    Artifact, BackgroundProcess, BuildMarker, CommandOutput, CommandRunner, DeployOptions,
    DeployWorkflow, DependencyFetcher, KeyStore, Network, OpsConfig, Revision, Stage,
    SystemRunner, ToolCommand, build_output_dir,
};
use tempdir::TempDir;

/// Imitates the external tools on top of a temporary repository root.
struct ScriptedToolchain {
    head: String,
    programs: Vec<String>,
    balance: Mutex<f64>,
    deploy_cost: f64,
    calls: Mutex<Vec<ToolCommand>>,
}

impl ScriptedToolchain {
    fn new(config: &OpsConfig, starting_balance: f64) -> Self {
        Self {
            head: config.dependency.revision.as_str().to_string(),
            programs: config.dependency.programs.clone(),
            balance: Mutex::new(starting_balance),
            deploy_cost: 1.25,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn find(&self, prefix: &[&str]) -> Option<ToolCommand> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.starts_with(prefix))
            .cloned()
    }

    fn answer(&self, cmd: &ToolCommand) -> CommandOutput {
        let args = cmd.arguments();
        match (cmd.program(), args.first().map(String::as_str)) {
            ("git", Some("clone")) => {
                let dest = PathBuf::from(args.last().unwrap());
                std::fs::create_dir_all(dest.join(".git")).unwrap();
                CommandOutput::success("")
            }
            ("git", Some("rev-parse")) => CommandOutput::success(format!("{}\n", self.head)),
            ("cargo", Some("build-bpf")) => {
                match cmd.flag_value("--bpf-out-dir") {
                    // The canvas program.
                    Some(out) => {
                        std::fs::create_dir_all(out).unwrap();
                        std::fs::write(Path::new(out).join("solana_place.so"), "place").unwrap();
                    }
                    // A dependency workspace.
                    None => {
                        let out = build_output_dir(cmd.working_dir().unwrap());
                        std::fs::create_dir_all(&out).unwrap();
                        for program in &self.programs {
                            let artifact = Artifact::in_dir(&out, program);
                            std::fs::write(artifact.binary, program).unwrap();
                            std::fs::write(artifact.keypair, "[]").unwrap();
                        }
                    }
                }
                CommandOutput::success("")
            }
            ("solana", Some("balance")) => {
                CommandOutput::success(format!("{} SOL\n", self.balance.lock().unwrap()))
            }
            ("solana", Some("airdrop")) => {
                *self.balance.lock().unwrap() += args[1].parse::<f64>().unwrap();
                CommandOutput::success("Signature: 5j7s\n")
            }
            ("solana", Some("program")) if args.get(1).map(String::as_str) == Some("deploy") => {
                *self.balance.lock().unwrap() -= self.deploy_cost;
                CommandOutput::success("")
            }
            _ => CommandOutput::success(""),
        }
    }
}

impl CommandRunner for ScriptedToolchain {
    async fn execute(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(cmd.clone());
        Ok(self.answer(cmd))
    }

    fn spawn(&self, cmd: &ToolCommand) -> Result<BackgroundProcess> {
        self.calls.lock().unwrap().push(cmd.clone());
        Ok(BackgroundProcess::detached(cmd.program()))
    }
}

/// Write a keypair file whose public half is `public`.
fn write_keypair(path: &Path, public: [u8; 32]) {
    let mut bytes = vec![1u8; 32];
    bytes.extend_from_slice(&public);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string(&bytes).unwrap()).unwrap();
}

fn repository(network: Network) -> (TempDir, OpsConfig) {
    let root = TempDir::new("tapestry-root").expect("Failed to create temp dir");
    let mut config = OpsConfig::new(root.path());
    config.funding.retry.initial_delay_ms = 1;
    let keys = KeyStore::new(config.keys_dir());
    write_keypair(&keys.program_id_keypath(network), [10u8; 32]);
    write_keypair(&keys.program_authority_keypath(network), [11u8; 32]);
    (root, config)
}

#[tokio::test]
async fn test_full_deploy_with_dependencies_and_airdrop() {
    let (_root, config) = repository(Network::Localhost);
    let tools = ScriptedToolchain::new(&config, 0.0);
    let options = DeployOptions {
        airdrop: true,
        with_dependencies: true,
        ..DeployOptions::new(Network::Localhost)
    };

    let report = DeployWorkflow::new(&tools, &config, options).run().await;

    assert!(report.is_success(), "deploy failed: {:?}", report.error);
    assert_eq!(report.stage, Stage::Done);

    // One grant of 10 reaches the deploy minimum of 10.
    assert_eq!(tools.count(&["solana", "airdrop"]), 1);
    assert_eq!(report.starting_balance, Some(10.0));
    assert_eq!(report.final_balance, Some(8.75));
    assert_eq!(report.cost(), Some(1.25));
    assert_eq!(
        report.dependency_commit.as_ref().map(|c| c.to_string()),
        Some(config.dependency.revision.to_string())
    );

    // Dependencies were built in their workspace and installed next to the program.
    let installed = Artifact::in_dir(&config.cargo_deploy_dir(), "mpl_token_metadata");
    assert!(installed.exists());
    let commit = report.dependency_commit.clone().unwrap();
    assert!(BuildMarker::exists(&build_output_dir(&config.mpl_root()), &commit));

    // The program was built for localhost and deployed from there.
    let deploy = tools.find(&["solana", "program", "deploy"]).unwrap();
    let so = Network::Localhost.deploy_dir(&config.root).join("solana_place.so");
    assert_eq!(deploy.arguments()[2], so.display().to_string());
    assert_eq!(deploy.flag_value("--url"), Some(config.networks.localhost.as_str()));

    let result = report.into_result().unwrap();
    assert_eq!(result.authority.name, "program-authority/localhost");
}

#[tokio::test]
async fn test_second_deploy_reuses_dependency_build() {
    let (_root, config) = repository(Network::Localhost);
    let tools = ScriptedToolchain::new(&config, 50.0);
    let options = DeployOptions {
        with_dependencies: true,
        ..DeployOptions::new(Network::Localhost)
    };

    for _ in 0..2 {
        let report = DeployWorkflow::new(&tools, &config, options).run().await;
        assert!(report.is_success(), "deploy failed: {:?}", report.error);
    }

    assert_eq!(tools.count(&["git", "clone"]), 1);
    // Two dependency builds would show up as four toolchain runs.
    assert_eq!(tools.count(&["cargo", "build-bpf"]), 3);
    assert_eq!(tools.count(&["solana", "program", "deploy"]), 2);
    assert_eq!(tools.count(&["solana", "airdrop"]), 0);
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=tapestry", "-c", "user.email=ops@tapestry.local"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(output.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// A local upstream with two commits and a tag on the first one.
fn upstream() -> (TempDir, String, String) {
    let dir = TempDir::new("tapestry-upstream").unwrap();
    git(dir.path(), &["init", "--quiet"]);
    std::fs::write(dir.path().join("README.md"), "one").unwrap();
    git(dir.path(), &["add", "README.md"]);
    git(dir.path(), &["commit", "--quiet", "-m", "one"]);
    let first = git(dir.path(), &["rev-parse", "HEAD"]);
    git(dir.path(), &["tag", "v0.0.1"]);
    std::fs::write(dir.path().join("README.md"), "two").unwrap();
    git(dir.path(), &["commit", "--quiet", "-am", "two"]);
    let second = git(dir.path(), &["rev-parse", "HEAD"]);
    (dir, first, second)
}

#[tokio::test]
async fn test_fetch_pins_existing_clone() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let (upstream, first, second) = upstream();
    let url = upstream.path().display().to_string();
    let work = TempDir::new("tapestry-deps").unwrap();
    let dest = work.path().join("checkout");
    let fetcher = DependencyFetcher::new(&SystemRunner);

    let commit = fetcher
        .fetch(&url, &Revision::parse(&first), &dest)
        .await
        .unwrap();
    assert_eq!(commit.as_str(), first);

    // Already cloned: no second clone, and the working copy moves to the new pin.
    let commit = fetcher
        .fetch(&url, &Revision::parse(&second), &dest)
        .await
        .unwrap();
    assert_eq!(commit.as_str(), second);
    assert_eq!(std::fs::read_to_string(dest.join("README.md")).unwrap(), "two");
}

#[tokio::test]
async fn test_fetch_resolves_tags() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let (upstream, first, _) = upstream();
    let work = TempDir::new("tapestry-deps").unwrap();
    let fetcher = DependencyFetcher::new(&SystemRunner);

    let commit = fetcher
        .fetch(
            &upstream.path().display().to_string(),
            &Revision::parse("v0.0.1"),
            &work.path().join("checkout"),
        )
        .await
        .unwrap();

    assert_eq!(commit.as_str(), first);
}
