//! Credential store over SQLite via sqlx.
//!
//! The store starts `Closed`; [`CredentialStore::open`] is the only way to
//! `Open`.  Every other operation on a closed store fails with
//! [`StoreError::NotOpen`].
//!
//! Secrets are sealed with the master key before they reach SQL and opened
//! again on the way out, so callers only ever see plaintext and the
//! database only ever sees ciphertext.
//!
//! Mutations are serialised through one async mutex.  Reads go straight to
//! the pool; WAL mode guarantees they only observe committed rows.

use chrono::Utc;
use futures::stream::{self, Stream, TryStreamExt};
use parking_lot::RwLock;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::crypto;
use crate::error::StoreError;
use crate::keys::{KeyManager, MasterKey};
use crate::models::{CredentialRecord, CredentialRow, NewCredential};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Rows fetched per round trip while listing.
pub const DEFAULT_PAGE_SIZE: u32 = 256;

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str =
    "SELECT id, title, username, secret_enc, note, created_at, updated_at FROM credentials";

#[derive(Clone)]
struct Handle {
    pool: SqlitePool,
    key: Arc<MasterKey>,
}

/// `None` while the store is closed.  Listings hold a clone of the `Arc`
/// so every page sees the current state.
type SharedState = Arc<RwLock<Option<Handle>>>;

fn current(state: &SharedState) -> Result<Handle, StoreError> {
    state.read().clone().ok_or(StoreError::NotOpen)
}

pub struct CredentialStore {
    location: PathBuf,
    keys: KeyManager,
    state: SharedState,
    writer: Mutex<()>,
}

impl CredentialStore {
    /// A closed store bound to `location`.  Nothing touches the disk until
    /// [`open`](Self::open).
    pub fn new(location: impl Into<PathBuf>, keys: KeyManager) -> Self {
        Self {
            location: location.into(),
            keys,
            state: Arc::new(RwLock::new(None)),
            writer: Mutex::new(()),
        }
    }

    /// Construct and open in one step.
    pub async fn open_at(
        location: impl Into<PathBuf>,
        keys: KeyManager,
    ) -> Result<Self, StoreError> {
        let store = Self::new(location, keys);
        store.open().await?;
        Ok(store)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    /// Open (or create) the database and load (or create) the master key.
    /// Calling this on an open store is a no-op.
    pub async fn open(&self) -> Result<(), StoreError> {
        let _guard = self.writer.lock().await;
        if self.is_open() {
            return Ok(());
        }

        let pool = connect(&self.location).await?;
        let key = match self.keys.load_or_create() {
            Ok(key) => key,
            Err(e) => {
                pool.close().await;
                return Err(e.into());
            }
        };

        info!(
            location = %self.location.display(),
            key = %key.fingerprint(),
            "credential store opened"
        );
        *self.state.write() = Some(Handle {
            pool,
            key: Arc::new(key),
        });
        Ok(())
    }

    /// Release the storage handle and return to `Closed`.  Closing a closed
    /// store is a no-op.
    pub async fn close(&self) {
        let _guard = self.writer.lock().await;
        let handle = self.state.write().take();
        if let Some(handle) = handle {
            handle.pool.close().await;
            info!(location = %self.location.display(), "credential store closed");
        }
    }

    fn handle(&self) -> Result<Handle, StoreError> {
        current(&self.state)
    }

    /// Insert a new credential and return its id.
    pub async fn add(&self, entry: &NewCredential) -> Result<i64, StoreError> {
        let _guard = self.writer.lock().await;
        let handle = self.handle()?;
        entry.validate()?;
        let secret_enc =
            crypto::seal_secret(&handle.key, &entry.secret).map_err(StoreError::Encryption)?;
        let now = Utc::now();

        let id = sqlx::query(
            "INSERT INTO credentials (title, username, secret_enc, note, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.title)
        .bind(&entry.username)
        .bind(&secret_enc)
        .bind(&entry.note)
        .bind(now)
        .bind(now)
        .execute(&handle.pool)
        .await?
        .last_insert_rowid();

        info!(id, "credential added");
        Ok(id)
    }

    /// Replace every caller-visible field of an existing credential.  The
    /// secret is sealed again under the current key.
    pub async fn update(&self, id: i64, entry: &NewCredential) -> Result<(), StoreError> {
        let _guard = self.writer.lock().await;
        let handle = self.handle()?;
        entry.validate()?;
        let secret_enc =
            crypto::seal_secret(&handle.key, &entry.secret).map_err(StoreError::Encryption)?;

        let changed = sqlx::query(
            "UPDATE credentials \
             SET title = ?, username = ?, secret_enc = ?, note = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&entry.title)
        .bind(&entry.username)
        .bind(&secret_enc)
        .bind(&entry.note)
        .bind(Utc::now())
        .bind(id)
        .execute(&handle.pool)
        .await?
        .rows_affected();

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        info!(id, "credential updated");
        Ok(())
    }

    /// Remove a credential.  Deleting an id that does not exist succeeds.
    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let _guard = self.writer.lock().await;
        let handle = self.handle()?;

        let removed = sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(id)
            .execute(&handle.pool)
            .await?
            .rows_affected();

        if removed == 0 {
            debug!(id, "delete of absent credential ignored");
        } else {
            info!(id, "credential deleted");
        }
        Ok(())
    }

    /// Decrypted secret of one credential.
    pub async fn get_secret(&self, id: i64) -> Result<String, StoreError> {
        let handle = self.handle()?;
        let secret_enc: Option<String> =
            sqlx::query_scalar("SELECT secret_enc FROM credentials WHERE id = ?")
                .bind(id)
                .fetch_optional(&handle.pool)
                .await?;
        let secret_enc = secret_enc.ok_or(StoreError::NotFound(id))?;
        crypto::open_secret(&handle.key, &secret_enc)
            .map_err(|source| StoreError::Decryption { id, source })
    }

    /// One full decrypted record.
    pub async fn get(&self, id: i64) -> Result<CredentialRecord, StoreError> {
        let handle = self.handle()?;
        let row: Option<CredentialRow> =
            sqlx::query_as::<_, CredentialRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&handle.pool)
                .await?;
        let row = row.ok_or(StoreError::NotFound(id))?;
        decrypt_row(&handle.key, row)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let handle = self.handle()?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials")
            .fetch_one(&handle.pool)
            .await?;
        Ok(n)
    }

    /// Records whose title or username contains `filter` (case-sensitive),
    /// in ascending id order.  An empty filter matches everything.
    ///
    /// Nothing is read until the returned [`Listing`] is consumed.  Each page
    /// checks the store again, so a listing consumed after [`close`](Self::close)
    /// fails with [`StoreError::NotOpen`].
    pub fn list(&self, filter: &str) -> Result<Listing, StoreError> {
        self.handle()?;
        Ok(Listing {
            state: Arc::clone(&self.state),
            filter: filter.to_owned(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }
}

async fn connect(location: &Path) -> Result<SqlitePool, StoreError> {
    let unavailable = |reason: String| StoreError::StorageUnavailable {
        location: location.to_path_buf(),
        reason,
    };

    if let Some(parent) = location.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
    }

    // Journal mode is set per connection; SQLite refuses to change it inside
    // the transaction a migration runs in.
    let opts = SqliteConnectOptions::new()
        .filename(location)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(opts)
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    if let Err(e) = MIGRATOR.run(&pool).await {
        pool.close().await;
        return Err(unavailable(e.to_string()));
    }
    Ok(pool)
}

fn decrypt_row(key: &MasterKey, row: CredentialRow) -> Result<CredentialRecord, StoreError> {
    let secret = crypto::open_secret(key, &row.secret_enc)
        .map_err(|source| StoreError::Decryption { id: row.id, source })?;
    Ok(CredentialRecord {
        id: row.id,
        title: row.title,
        username: row.username,
        secret,
        note: row.note,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// A lazily evaluated listing.  Each call to [`stream`](Self::stream)
/// starts again from the lowest id, so the same listing can be walked more
/// than once.
pub struct Listing {
    state: SharedState,
    filter: String,
    page_size: u32,
}

impl Listing {
    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Records page by page.  The stream ends after the first error.
    pub fn stream(
        &self,
    ) -> impl Stream<Item = Result<CredentialRecord, StoreError>> + Send + 'static {
        let state = Arc::clone(&self.state);
        let filter = self.filter.clone();
        let page_size = self.page_size;

        stream::try_unfold(Some(0i64), move |cursor| {
            next_page(Arc::clone(&state), filter.clone(), cursor, page_size)
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StoreError>)))
        .try_flatten()
    }

    /// Every matching record, or the first error.  Never returns a partial
    /// result.
    pub async fn collect(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        self.stream().try_collect().await
    }

    /// Number of matching records, decrypting each to verify it.
    pub async fn verified_count(&self) -> Result<usize, StoreError> {
        self.stream()
            .try_fold(0usize, |n, _| async move { Ok(n + 1) })
            .await
    }
}

type Page = (Vec<CredentialRecord>, Option<i64>);

/// Keyset pagination: rows with `id > after`, at most `page_size` of them.
/// `None` as the cursor means the previous page was the last.
async fn next_page(
    state: SharedState,
    filter: String,
    cursor: Option<i64>,
    page_size: u32,
) -> Result<Option<Page>, StoreError> {
    let Some(after) = cursor else {
        return Ok(None);
    };
    let Handle { pool, key } = current(&state)?;

    let rows: Vec<CredentialRow> = if filter.is_empty() {
        sqlx::query_as::<_, CredentialRow>(&format!(
            "{SELECT_COLUMNS} WHERE id > ? ORDER BY id ASC LIMIT ?"
        ))
        .bind(after)
        .bind(i64::from(page_size))
        .fetch_all(&pool)
        .await?
    } else {
        // instr() is a literal, case-sensitive substring test; LIKE would
        // fold ASCII case and treat % and _ as wildcards.
        sqlx::query_as::<_, CredentialRow>(&format!(
            "{SELECT_COLUMNS} WHERE id > ? AND (instr(title, ?) > 0 OR instr(username, ?) > 0) \
             ORDER BY id ASC LIMIT ?"
        ))
        .bind(after)
        .bind(&filter)
        .bind(&filter)
        .bind(i64::from(page_size))
        .fetch_all(&pool)
        .await?
    };

    let Some(last_id) = rows.last().map(|row| row.id) else {
        return Ok(None);
    };
    let next = if rows.len() < page_size as usize {
        None
    } else {
        Some(last_id)
    };
    debug!(after, fetched = rows.len(), "listing page");

    let records = rows
        .into_iter()
        .map(|row| decrypt_row(&key, row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some((records, next)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures::StreamExt;
    use tempfile::{tempdir, TempDir};

    async fn open_store() -> (TempDir, CredentialStore) {
        let dir = tempdir().unwrap();
        let store = CredentialStore::open_at(
            dir.path().join("passwords.db"),
            KeyManager::new(dir.path().join("secret.key")),
        )
        .await
        .unwrap();
        (dir, store)
    }

    fn entry(title: &str, username: &str, secret: &str) -> NewCredential {
        NewCredential::new(title, username, secret)
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(
            dir.path().join("passwords.db"),
            KeyManager::new(dir.path().join("secret.key")),
        );
        assert!(!store.is_open());

        let e = entry("Email", "alice", "pw");
        assert_eq!(store.add(&e).await.unwrap_err().kind(), ErrorKind::NotOpen);
        assert_eq!(store.update(1, &e).await.unwrap_err().kind(), ErrorKind::NotOpen);
        assert_eq!(store.delete(1).await.unwrap_err().kind(), ErrorKind::NotOpen);
        assert_eq!(store.get_secret(1).await.unwrap_err().kind(), ErrorKind::NotOpen);
        assert_eq!(store.count().await.unwrap_err().kind(), ErrorKind::NotOpen);
        assert!(matches!(store.list(""), Err(StoreError::NotOpen)));
        // Nothing was created on disk.
        assert!(!dir.path().join("passwords.db").exists());
        assert!(!dir.path().join("secret.key").exists());
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let (_dir, store) = open_store().await;
        let id = store.add(&entry("Email", "alice", "pw")).await.unwrap();
        store.open().await.unwrap();
        store.open().await.unwrap();
        assert_eq!(store.get_secret(id).await.unwrap(), "pw");
    }

    #[tokio::test]
    async fn close_then_reopen() {
        let (_dir, store) = open_store().await;
        let id = store.add(&entry("Email", "alice", "pw")).await.unwrap();
        store.close().await;
        assert!(!store.is_open());
        assert!(matches!(store.get_secret(id).await, Err(StoreError::NotOpen)));
        store.close().await;

        store.open().await.unwrap();
        assert_eq!(store.get_secret(id).await.unwrap(), "pw");
    }

    #[tokio::test]
    async fn listing_after_close_is_not_open() {
        let (_dir, store) = open_store().await;
        for i in 0..3 {
            store
                .add(&entry(&format!("t{i}"), "u", "pw"))
                .await
                .unwrap();
        }
        let listing = store.list("").unwrap().with_page_size(2);
        assert_eq!(listing.collect().await.unwrap().len(), 3);

        store.close().await;
        assert_eq!(listing.collect().await.unwrap_err().kind(), ErrorKind::NotOpen);
        assert_eq!(listing.verified_count().await.unwrap_err().kind(), ErrorKind::NotOpen);

        // The same listing works again once the store is reopened.
        store.open().await.unwrap();
        assert_eq!(listing.collect().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn close_mid_listing_stops_with_not_open() {
        let (_dir, store) = open_store().await;
        for i in 0..4 {
            store
                .add(&entry(&format!("t{i}"), "u", "pw"))
                .await
                .unwrap();
        }
        let listing = store.list("").unwrap().with_page_size(2);
        let mut stream = Box::pin(listing.stream());
        assert_eq!(stream.next().await.unwrap().unwrap().id, 1);
        assert_eq!(stream.next().await.unwrap().unwrap().id, 2);

        store.close().await;
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotOpen);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writes_racing_close_fail_with_not_open() {
        let (_dir, store) = open_store().await;
        let store = Arc::new(store);
        let writers: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.add(&entry(&format!("t{i}"), "u", "pw")).await
                })
            })
            .collect();
        store.close().await;

        for writer in writers {
            if let Err(err) = writer.await.unwrap() {
                assert_eq!(err.kind(), ErrorKind::NotOpen);
            }
        }
    }

    #[tokio::test]
    async fn directory_as_location_is_unavailable() {
        let dir = tempdir().unwrap();
        let err = CredentialStore::open_at(dir.path(), KeyManager::new(dir.path().join("k.key")))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[tokio::test]
    async fn non_database_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("passwords.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        let err = CredentialStore::open_at(&path, KeyManager::new(dir.path().join("k.key")))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[tokio::test]
    async fn corrupt_key_fails_open_with_key_format() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("secret.key"), b"not a key").unwrap();
        let store = CredentialStore::new(
            dir.path().join("passwords.db"),
            KeyManager::new(dir.path().join("secret.key")),
        );
        let err = store.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyFormat);
        assert!(!store.is_open());
    }

    #[tokio::test]
    async fn secret_is_not_stored_in_plaintext() {
        let (_dir, store) = open_store().await;
        let id = store
            .add(&entry("Email", "alice", "Secr3t!"))
            .await
            .unwrap();
        let handle = store.handle().unwrap();
        let stored: String = sqlx::query_scalar("SELECT secret_enc FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_one(&handle.pool)
            .await
            .unwrap();
        assert!(!stored.contains("Secr3t!"));
        assert_eq!(store.get_secret(id).await.unwrap(), "Secr3t!");
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_decryption() {
        let (_dir, store) = open_store().await;
        let id = store.add(&entry("Email", "alice", "pw")).await.unwrap();
        let handle = store.handle().unwrap();

        let stored: String = sqlx::query_scalar("SELECT secret_enc FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_one(&handle.pool)
            .await
            .unwrap();
        // Swap the final character for a different base64url symbol.
        let mut tampered = stored.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        sqlx::query("UPDATE credentials SET secret_enc = ? WHERE id = ?")
            .bind(&tampered)
            .bind(id)
            .execute(&handle.pool)
            .await
            .unwrap();

        let err = store.get_secret(id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decryption);
        let err = store.list("").unwrap().collect().await.unwrap_err();
        assert!(matches!(err, StoreError::Decryption { id: failed, .. } if failed == id));
    }

    #[tokio::test]
    async fn filter_is_case_sensitive_and_literal() {
        let (_dir, store) = open_store().await;
        store.add(&entry("Email", "alice", "pw")).await.unwrap();
        store.add(&entry("email backup", "ALICE", "pw")).await.unwrap();
        store.add(&entry("100% off", "shop_user", "pw")).await.unwrap();

        let titles = |records: Vec<CredentialRecord>| -> Vec<String> {
            records.into_iter().map(|r| r.title).collect()
        };
        assert_eq!(
            titles(store.list("Email").unwrap().collect().await.unwrap()),
            vec!["Email"]
        );
        assert_eq!(
            titles(store.list("alice").unwrap().collect().await.unwrap()),
            vec!["Email"]
        );
        assert_eq!(
            titles(store.list("%").unwrap().collect().await.unwrap()),
            vec!["100% off"]
        );
        assert_eq!(
            titles(store.list("p_u").unwrap().collect().await.unwrap()),
            vec!["100% off"]
        );
        assert!(store.list("_x").unwrap().collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_spans_pages_in_id_order() {
        let (_dir, store) = open_store().await;
        for i in 0..7 {
            store
                .add(&entry(&format!("site-{i}"), "user", &format!("pw-{i}")))
                .await
                .unwrap();
        }
        let listing = store.list("").unwrap().with_page_size(3);
        let records = listing.collect().await.unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=7).collect::<Vec<_>>());
        assert_eq!(records[4].secret, "pw-4");

        // Exact multiple of the page size.
        let listing = store.list("").unwrap().with_page_size(7);
        assert_eq!(listing.verified_count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn listing_is_restartable_and_sees_new_rows() {
        let (_dir, store) = open_store().await;
        store.add(&entry("a", "u", "1")).await.unwrap();
        let listing = store.list("").unwrap();
        assert_eq!(listing.collect().await.unwrap().len(), 1);

        store.add(&entry("b", "u", "2")).await.unwrap();
        assert_eq!(listing.collect().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn consumer_can_stop_early() {
        let (_dir, store) = open_store().await;
        for i in 0..10 {
            store
                .add(&entry(&format!("t{i}"), "u", "pw"))
                .await
                .unwrap();
        }
        let listing = store.list("").unwrap().with_page_size(2);
        let first: Vec<_> = listing.stream().take(3).collect().await;
        assert_eq!(first.len(), 3);
        assert_eq!(first[2].as_ref().unwrap().id, 3);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let (_dir, store) = open_store().await;
        let first = store.add(&entry("a", "u", "1")).await.unwrap();
        let second = store.add(&entry("b", "u", "2")).await.unwrap();
        store.delete(second).await.unwrap();
        store.delete(first).await.unwrap();
        let third = store.add(&entry("c", "u", "3")).await.unwrap();
        assert!(third > second);
    }

    #[tokio::test]
    async fn update_refreshes_updated_at_only() {
        let (_dir, store) = open_store().await;
        let id = store.add(&entry("a", "u", "1")).await.unwrap();
        let before = store.get(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.update(id, &entry("b", "v", "2")).await.unwrap();
        let after = store.get(id).await.unwrap();
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn update_validates_before_lookup() {
        let (_dir, store) = open_store().await;
        let err = store.update(99, &entry("", "u", "pw")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "title", .. }));
    }
}
