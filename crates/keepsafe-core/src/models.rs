//! Credential records and their SQL row mapping.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::StoreError;

/// A credential as handed to callers.  `secret` is always plaintext here;
/// ciphertext never leaves the store.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: i64,
    pub title: String,
    pub username: String,
    pub secret: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("note", &self.note)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Caller input for `add` and `update`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct NewCredential {
    pub title: String,
    pub username: String,
    pub secret: String,
    pub note: String,
}

impl NewCredential {
    pub fn new(
        title: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            username: username.into(),
            secret: secret.into(),
            note: String::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Title, username and secret must be non-empty.  The first empty field
    /// in that order is reported.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (field, value) in [
            ("title", &self.title),
            ("username", &self.username),
            ("secret", &self.secret),
        ] {
            if value.is_empty() {
                return Err(StoreError::Validation {
                    field,
                    reason: "must not be empty",
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCredential")
            .field("title", &self.title)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("note", &self.note)
            .finish()
    }
}

/// Raw `credentials` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRow {
    pub id: i64,
    pub title: String,
    pub username: String,
    /// base64url(nonce || ciphertext || tag)
    pub secret_enc: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
