//! Key files and the identities they back.
//!
//! A key file is the `solana-keygen` JSON encoding of an ed25519 keypair: an array of 64
//! integers, the 32-byte secret followed by the 32-byte public key. The public address is
//! the base-58 encoding of the second half.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;

use crate::{
    Network, OpsError,
    process::{CommandRunner, ToolCommand},
};

/// Number of integers in a keypair file.
pub const KEYPAIR_LEN: usize = 64;

/// A named, key-file-backed actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub keypath: PathBuf,
    pub address: Pubkey,
}

/// Resolves identity names to key files under a keys directory.
#[derive(Debug, Clone)]
pub struct KeyStore {
    keys_dir: PathBuf,
}

impl KeyStore {
    pub fn new(keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
        }
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    /// Key file of a named identity: `<keys_dir>/<name>.json`.
    pub fn keypath(&self, name: &str) -> PathBuf {
        self.keys_dir.join(format!("{name}.json"))
    }

    /// Key file holding the program identity deployed to `network`.
    pub fn program_id_keypath(&self, network: Network) -> PathBuf {
        self.keys_dir
            .join("program_ids")
            .join(format!("{network}.json"))
    }

    /// Key file of the upgrade authority used on `network`.
    pub fn program_authority_keypath(&self, network: Network) -> PathBuf {
        self.keys_dir
            .join("program_auths")
            .join(format!("{network}.json"))
    }

    pub fn resolve_address(&self, name: &str) -> Result<Pubkey> {
        address_from_keyfile(name, &self.keypath(name))
    }

    pub fn identity(&self, name: &str) -> Result<Identity> {
        Self::load(name, self.keypath(name))
    }

    pub fn program_id(&self, network: Network) -> Result<Identity> {
        Self::load(
            &format!("program-id/{network}"),
            self.program_id_keypath(network),
        )
    }

    pub fn program_authority(&self, network: Network) -> Result<Identity> {
        Self::load(
            &format!("program-authority/{network}"),
            self.program_authority_keypath(network),
        )
    }

    fn load(name: &str, keypath: PathBuf) -> Result<Identity> {
        let address = address_from_keyfile(name, &keypath)?;
        Ok(Identity {
            name: name.to_string(),
            keypath,
            address,
        })
    }

    /// Generate the key file of `name` with `solana-keygen` if it does not exist yet.
    pub async fn ensure_keypair<R: CommandRunner>(&self, runner: &R, name: &str) -> Result<Identity> {
        let keypath = self.keypath(name);
        if !keypath.exists() {
            tracing::info!(identity = name, path = %keypath.display(), "Generating keypair");
            std::fs::create_dir_all(&self.keys_dir).with_context(|| {
                format!("Failed to create keys directory {}", self.keys_dir.display())
            })?;
            runner
                .run(
                    &ToolCommand::new("solana-keygen")
                        .args(["new", "-o"])
                        .path_arg(&keypath)
                        .arg("--no-bip39-passphrase"),
                )
                .await?;
        }
        self.identity(name)
    }
}

/// Derive the public address stored in a key file.
pub fn address_from_keyfile(name: &str, path: &Path) -> Result<Pubkey> {
    if !path.exists() {
        return Err(OpsError::KeyNotFound {
            name: name.to_string(),
            path: path.to_path_buf(),
        }
        .into());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;

    address_from_keypair_json(&content).map_err(|reason| {
        anyhow::Error::from(OpsError::KeyFormat {
            path: path.to_path_buf(),
            reason,
        })
    })
}

/// Derive the public address from the JSON keypair encoding.
pub fn address_from_keypair_json(content: &str) -> Result<Pubkey, String> {
    let numbers: Vec<i64> =
        serde_json::from_str(content).map_err(|e| format!("not a JSON integer array: {e}"))?;

    if numbers.len() != KEYPAIR_LEN {
        return Err(format!(
            "expected {KEYPAIR_LEN} entries, found {}",
            numbers.len()
        ));
    }

    let bytes = numbers
        .iter()
        .map(|&n| u8::try_from(n).map_err(|_| format!("entry {n} is not a byte")))
        .collect::<Result<Vec<u8>, _>>()?;

    let mut public = [0u8; 32];
    public.copy_from_slice(&bytes[32..]);
    Ok(Pubkey::new_from_array(public))
}
