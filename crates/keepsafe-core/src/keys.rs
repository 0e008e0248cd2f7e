//! Master key lifecycle.
//!
//! One 32-byte XChaCha20-Poly1305 key per storage location, kept as raw
//! bytes in a key file beside the database.  The key is created on first
//! use and loaded unchanged afterwards.  Losing the key file makes every
//! stored secret unrecoverable.
//!
//! Creation goes through a temp file in the target directory that is
//! restricted to the owner before any key byte is written, then linked into
//! place without clobbering.  Two processes racing on first creation both
//! end up with whichever key was linked first.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use zeroize::{Zeroizing, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("cannot access key file {}: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("key file {} is malformed: expected {} bytes, found {found}", path.display(), KEY_LEN)]
    Format { path: PathBuf, found: usize },
}

impl KeyError {
    fn access(path: &Path, source: io::Error) -> Self {
        KeyError::Access {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// First 8 bytes of SHA-256 over the key, hex encoded.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Owns the key file for one storage location.
#[derive(Debug, Clone)]
pub struct KeyManager {
    path: PathBuf,
}

impl KeyManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the key if the file exists, otherwise generate and persist one.
    pub fn load_or_create(&self) -> Result<MasterKey, KeyError> {
        match self.load()? {
            Some(key) => Ok(key),
            None => self.create(),
        }
    }

    /// Read an existing key.  `Ok(None)` means the file is absent.
    pub fn load(&self) -> Result<Option<MasterKey>, KeyError> {
        let data = match fs::read(&self.path) {
            Ok(data) => Zeroizing::new(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(KeyError::access(&self.path, e)),
        };
        let bytes: [u8; KEY_LEN] = data.as_slice().try_into().map_err(|_| KeyError::Format {
            path: self.path.clone(),
            found: data.len(),
        })?;
        warn_if_shared(&self.path);
        Ok(Some(MasterKey::from_bytes(bytes)))
    }

    fn create(&self) -> Result<MasterKey, KeyError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| KeyError::access(&dir, e))?;

        let key = MasterKey::generate();
        let mut staged = tempfile::Builder::new()
            .prefix(".keepsafe-key")
            .tempfile_in(&dir)
            .map_err(|e| KeyError::access(&dir, e))?;
        restrict_to_owner(staged.path()).map_err(|e| KeyError::access(&self.path, e))?;
        staged
            .write_all(key.as_bytes())
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| KeyError::access(&self.path, e))?;

        match staged.persist_noclobber(&self.path) {
            Ok(_) => {
                info!(
                    path = %self.path.display(),
                    fingerprint = %key.fingerprint(),
                    "created master key"
                );
                Ok(key)
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    path = %self.path.display(),
                    "key file appeared during creation, using the existing key"
                );
                self.load()?.ok_or_else(|| {
                    KeyError::access(&self.path, io::Error::from(io::ErrorKind::NotFound))
                })
            }
            Err(e) => Err(KeyError::access(&self.path, e.error)),
        }
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("key file mode is {:o} after restricting to 0600", mode & 0o777),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "owner-only key file permissions cannot be enforced on this platform",
    ))
}

fn warn_if_shared(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(path) {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    path = %path.display(),
                    mode = %format!("{:o}", mode & 0o777),
                    "key file is readable by other users"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
