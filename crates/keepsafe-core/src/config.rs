use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::generator::PasswordGenerator;
use crate::keys::KeyManager;
use crate::paths::{CONFIG_FILE, DATABASE_FILE, KEY_FILE};
use crate::store::CredentialStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeepsafeConfig {
    pub database_path: PathBuf,
    pub key_path: PathBuf,
    #[serde(default)]
    pub generator: PasswordGenerator,
}

impl KeepsafeConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            database_path: data_dir.join(DATABASE_FILE),
            key_path: data_dir.join(KEY_FILE),
            generator: PasswordGenerator::default(),
        }
    }

    /// Read `config.json` from `data_dir`, falling back to defaults when the
    /// file does not exist.
    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::with_data_dir(data_dir));
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn save(&self, data_dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("write config {}", path.display()))?;
        Ok(())
    }

    /// A closed store for the configured locations.
    pub fn store(&self) -> CredentialStore {
        CredentialStore::new(&self.database_path, KeyManager::new(&self.key_path))
    }
}
