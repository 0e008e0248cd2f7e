//! keepsafe-core: encrypted local credential store
//!
//! # Encryption strategy
//! SQLite does NOT natively encrypt.  Encryption is applied per field:
//! - The `secret` column holds XChaCha20-Poly1305 ciphertext, base64url
//!   encoded.  Tampering or a wrong key is caught by the tag on read.
//! - Title, username and note stay plaintext so they can be searched.
//! - The 32-byte master key lives in an owner-only key file next to the
//!   database.  Lose it and the secrets are gone.
//!
//! # Module layout
//! - `keys`       master key creation, persistence, loading
//! - `crypto`     AEAD seal/open helpers
//! - `models`     records and SQL rows
//! - `store`      the credential store and lazy listings
//! - `transfer`   CSV import/export
//! - `generator`  random passwords
//! - `strength`   password strength score
//! - `config`     settings file
//! - `paths`      default locations
//! - `error`      store error type

pub mod config;
pub mod crypto;
pub mod error;
pub mod generator;
pub mod keys;
pub mod models;
pub mod paths;
pub mod store;
pub mod strength;
pub mod transfer;

pub use error::{ErrorKind, StoreError};
pub use keys::{KeyError, KeyManager, MasterKey};
pub use models::{CredentialRecord, NewCredential};
pub use store::{CredentialStore, Listing};
