use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "keepsafe";
pub const APP_NAME: &str = "keepsafe";

pub const DATA_DIR_ENV: &str = "KEEPSAFE_DATA_DIR";

pub const DATABASE_FILE: &str = "passwords.db";
pub const KEY_FILE: &str = "secret.key";
pub const CONFIG_FILE: &str = "config.json";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}
