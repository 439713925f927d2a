//! Operator configuration.
//!
//! Built once at startup from defaults, an optional `Tapestry.toml` and `TAPESTRY_*`
//! environment variables, then passed by reference to every component.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    DependencyConfig, FundingPolicy, MosaicConfig, NetworkEndpoints, PlaceConfig, ProgramConfig,
    SnapshotConfig, SwarmConfig, ValidatorConfig,
};

/// Default configuration file name, looked up in the repository root.
pub const CONFIG_FILENAME: &str = "Tapestry.toml";

/// Prefix of the environment variables overriding the configuration.
pub const ENV_PREFIX: &str = "TAPESTRY_";

/// Balance requirements of the operations that fund an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingConfig {
    /// Retry bounds shared by every funding loop.
    pub retry: FundingPolicy,
    /// Balance the program authority needs before a deploy.
    pub deploy_minimum: f64,
    pub deploy_grant: f64,
    /// Balance the place owner needs before initialization.
    pub init_place_minimum: f64,
    pub init_place_grant: f64,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            retry: FundingPolicy::default(),
            deploy_minimum: 10.0,
            deploy_grant: 10.0,
            init_place_minimum: 25.0,
            init_place_grant: 3.0,
        }
    }
}

/// Everything the operator commands need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    /// Repository root every other path hangs off.
    pub root: PathBuf,
    pub networks: NetworkEndpoints,
    pub funding: FundingConfig,
    pub program: ProgramConfig,
    pub dependency: DependencyConfig,
    pub validator: ValidatorConfig,
    pub place: PlaceConfig,
    pub swarm: SwarmConfig,
    pub snapshot: SnapshotConfig,
    pub mosaic: MosaicConfig,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("."))
    }
}

impl OpsConfig {
    /// Defaults for a repository rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            networks: NetworkEndpoints::default(),
            funding: FundingConfig::default(),
            program: ProgramConfig::default(),
            dependency: DependencyConfig::default(),
            validator: ValidatorConfig::default(),
            place: PlaceConfig::default(),
            swarm: SwarmConfig::default(),
            snapshot: SnapshotConfig::default(),
            mosaic: MosaicConfig::default(),
        }
    }

    /// Layer defaults, the config file and the environment.
    ///
    /// `config_path` defaults to `<root>/Tapestry.toml`, which may be absent. An explicit
    /// path must exist. `root` always wins over a root found in the layers.
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let file = match config_path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => root.join(CONFIG_FILENAME),
        };

        let mut config: Self = Self::figment(root, &file)
            .extract()
            .with_context(|| format!("Failed to load configuration ({})", file.display()))?;
        config.root = root.to_path_buf();

        tracing::debug!(root = %config.root.display(), file = %file.display(), "Configuration loaded");
        Ok(config)
    }

    fn figment(root: &Path, file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::new(root)))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `Tapestry.toml` inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    /// Directory holding the checked-out third-party dependencies.
    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build").join("custom_deps")
    }

    /// Working copy of the Metaplex program library.
    pub fn mpl_root(&self) -> PathBuf {
        self.build_dir().join("mpl-program-library")
    }

    /// Where installed dependency artifacts land for the program's own tests.
    pub fn cargo_deploy_dir(&self) -> PathBuf {
        self.root.join("target").join("deploy")
    }

    /// Build output of the canvas program loaded by the local test validator.
    pub fn program_deploy_dir(&self) -> PathBuf {
        self.root.join("program").join("target").join("deploy")
    }
}
