//! Authenticated encryption for stored secrets.
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce).
//! Key size: 32 bytes.  Nonce: 24 bytes (random).  Tag: 16 bytes.
//!
//! Ciphertext wire format:
//!   [ nonce (24 bytes) | ciphertext + tag ]
//!
//! Column encoding is URL-safe base64 without padding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::keys::MasterKey;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Associated data for the `secret_enc` column.
pub const SECRET_AAD: &[u8] = b"keepsafe-secret-v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    Encrypt,

    #[error("AEAD decryption failed (authentication tag mismatch, wrong key or tampered data)")]
    Decrypt,

    #[error("ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),
}

/// Encrypt `plaintext`, prepending a random 24-byte nonce.
pub fn encrypt(key: &MasterKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Encrypt)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
pub fn decrypt(
    key: &MasterKey,
    data: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Truncated(data.len()));
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Decrypt)?;
    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ct, aad })
        .map_err(|_| CryptoError::Decrypt)?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt a secret string for the `secret_enc` column.
pub fn seal_secret(key: &MasterKey, secret: &str) -> Result<String, CryptoError> {
    let ct = encrypt(key, secret.as_bytes(), SECRET_AAD)?;
    Ok(URL_SAFE_NO_PAD.encode(ct))
}

/// Reverse of [`seal_secret`]. Invalid UTF-8 after a successful tag check is
/// still treated as a decryption failure.
pub fn open_secret(key: &MasterKey, encoded: &str) -> Result<String, CryptoError> {
    let ct = URL_SAFE_NO_PAD.decode(encoded)?;
    let pt = decrypt(key, &ct, SECRET_AAD)?;
    String::from_utf8(pt.to_vec()).map_err(|_| CryptoError::Decrypt)
}
