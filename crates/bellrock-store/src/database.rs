//! Database connection management.
//!
//! The [`Database`] struct owns the [`rusqlite::Connection`] of the main
//! store together with the segregated [`KeyStore`], and guarantees that
//! migrations are run before any other operation.
//!
//! Write paths come in three flavours:
//! - single-row mutations commit immediately;
//! - bulk mutations run in one transaction and commit once at the end;
//! - the buffered path (high-volume location sync) batches rows in an open
//!   transaction until either the buffer threshold is reached or the owner
//!   calls [`flush`], which the server does from a ~5 s ticker.
//!
//! [`flush`]: Database::flush

use std::cell::Cell;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use bellrock_shared::constants::{COMMIT_BUFFER_SIZE, MASTER_KEY_SIZE};

use crate::error::Result;
use crate::keystore::KeyStore;
use crate::migrations;

pub struct Database {
    conn: Connection,
    keystore: KeyStore,
    commit_buffer: usize,
    pending: Cell<usize>,
    in_tx: Cell<bool>,
}

impl Database {
    /// Open (or create) the main store at `db_path` and the key store at
    /// `keystore_path`. The `master_key` seals key material at rest.
    pub fn open(
        db_path: &Path,
        keystore_path: &Path,
        master_key: &[u8; MASTER_KEY_SIZE],
    ) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        tracing::info!(path = %db_path.display(), "opening database");

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        let keystore = KeyStore::open(keystore_path, master_key)?;

        Ok(Self {
            conn,
            keystore,
            commit_buffer: COMMIT_BUFFER_SIZE,
            pending: Cell::new(0),
            in_tx: Cell::new(false),
        })
    }

    /// Override the buffered-path commit threshold (default 5000 rows).
    pub fn set_commit_buffer(&mut self, rows: usize) {
        self.commit_buffer = rows.max(1);
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Commit any rows buffered by the high-volume write path. A no-op when
    /// nothing is pending.
    pub fn flush(&self) -> Result<()> {
        if self.in_tx.get() {
            self.conn.execute_batch("COMMIT")?;
            self.in_tx.set(false);
            let flushed = self.pending.replace(0);
            tracing::debug!(rows = flushed, "flushed buffered writes");
        }
        Ok(())
    }

    /// Number of rows currently awaiting the next commit.
    pub fn pending_rows(&self) -> usize {
        self.pending.get()
    }

    // -- write-path plumbing used by the per-entity impl blocks --

    /// Open the buffered transaction if it is not already open.
    pub(crate) fn begin_buffered(&self) -> Result<()> {
        if !self.in_tx.get() {
            self.conn.execute_batch("BEGIN")?;
            self.in_tx.set(true);
        }
        Ok(())
    }

    /// Account one buffered row; commits once the buffer threshold is hit.
    pub(crate) fn buffered_commit(&self) -> Result<()> {
        self.pending.set(self.pending.get() + 1);
        if self.pending.get() >= self.commit_buffer {
            self.flush()?;
        }
        Ok(())
    }

    /// Make a single-row mutation durable now. If the buffered transaction is
    /// open the mutation has joined it, so this commits the buffer as well.
    pub(crate) fn commit_now(&self) -> Result<()> {
        self.flush()
    }

    /// Run `f` as one transaction that commits fully or not at all. Pending
    /// buffered rows are flushed first so a rollback cannot take them down
    /// with it.
    pub(crate) fn bulk<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.flush()?;
        self.conn.execute_batch("BEGIN")?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Remove data from all tables, including the key store.
    pub fn clear(&self) -> Result<()> {
        self.bulk(|conn| {
            conn.execute("DELETE FROM observations", [])?;
            conn.execute("DELETE FROM locations", [])?;
            conn.execute("DELETE FROM peers", [])?;
            conn.execute("DELETE FROM users", [])?;
            Ok(())
        })?;
        self.keystore.clear()
    }
}
