//! CSV import and export.
//!
//! Interchange format: a header row, then four fields per row in the order
//! title, username, secret, note.  Export writes plaintext secrets, so the
//! file helper creates its output owner-only.
//!
//! Import skips the header unconditionally, skips rows that do not have
//! exactly four fields, and feeds everything else through
//! [`CredentialStore::add`] so the usual validation applies.

use futures::{pin_mut, TryStreamExt};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{ErrorKind, StoreError};
use crate::models::NewCredential;
use crate::store::CredentialStore;

pub const HEADER: [&str; 4] = ["title", "username", "secret", "note"];

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("row at line {line} rejected: {source}")]
    Row {
        line: u64,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to do when `add` rejects an imported row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportPolicy {
    /// Stop at the first rejected row.  Rows before it stay imported.
    #[default]
    Abort,
    /// Record rows that fail validation and keep going.  Storage, key and
    /// open-state failures still stop the batch.
    Continue,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    /// Ids assigned to imported rows, in file order.
    pub imported: Vec<i64>,
    /// Lines of rows skipped for not having exactly four fields.
    pub skipped: Vec<u64>,
    /// Lines of rows `add` rejected, with the reason.
    pub rejected: Vec<(u64, StoreError)>,
}

/// Write every record as CSV.  Returns the number of data rows.
pub async fn export_csv<W: Write>(
    store: &CredentialStore,
    writer: W,
) -> Result<usize, TransferError> {
    let listing = store.list("")?;
    let records = listing.stream();
    pin_mut!(records);

    let mut out = csv::Writer::from_writer(writer);
    out.write_record(HEADER)?;
    let mut written = 0usize;
    while let Some(record) = records.try_next().await? {
        out.write_record([
            record.title.as_str(),
            record.username.as_str(),
            record.secret.as_str(),
            record.note.as_str(),
        ])?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// Export into `path`.  The data is staged in a temp file beside `path`
/// and only moved into place once every record was written, so a failed
/// export leaves no partial file behind.
pub async fn export_csv_file(store: &CredentialStore, path: &Path) -> Result<usize, TransferError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::Builder::new()
        .prefix(".keepsafe-export")
        .tempfile_in(dir)?;
    let written = export_csv(store, staged.as_file_mut()).await?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| TransferError::Io(e.error))?;
    info!(path = %path.display(), records = written, "export finished");
    Ok(written)
}

/// Read CSV rows and add each as a credential.
pub async fn import_csv<R: io::Read>(
    store: &CredentialStore,
    reader: R,
    policy: ImportPolicy,
) -> Result<ImportReport, TransferError> {
    let mut rows = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let mut report = ImportReport::default();

    for row in rows.records() {
        let row = row?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        if row.len() != HEADER.len() {
            warn!(line, fields = row.len(), "skipping import row with wrong field count");
            report.skipped.push(line);
            continue;
        }

        let entry = NewCredential {
            title: row[0].to_owned(),
            username: row[1].to_owned(),
            secret: row[2].to_owned(),
            note: row[3].to_owned(),
        };
        match store.add(&entry).await {
            Ok(id) => report.imported.push(id),
            Err(e) if policy == ImportPolicy::Continue && e.kind() == ErrorKind::Validation => {
                warn!(line, error = %e, "import row rejected");
                report.rejected.push((line, e));
            }
            Err(e) => return Err(TransferError::Row { line, source: e }),
        }
    }

    info!(
        imported = report.imported.len(),
        skipped = report.skipped.len(),
        rejected = report.rejected.len(),
        "import finished"
    );
    Ok(report)
}
