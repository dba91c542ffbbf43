//! The segregated key store.
//!
//! Device secret keys never live in the main database. They are kept in a
//! separate SQLite file whose key column is encrypted at rest with
//! XChaCha20-Poly1305 under a key derived from the operator-supplied master
//! key (BLAKE3 KDF with a dedicated context string).

use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rusqlite::{params, Connection};

use bellrock_shared::constants::{KDF_CONTEXT_KEY_STORE, KEY_SIZE, MASTER_KEY_SIZE};
use bellrock_shared::crypto::SecretKey;
use bellrock_shared::{CryptoError, Uid};

use crate::error::{Result, StoreError};

const XNONCE_SIZE: usize = 24;

const CREATE_SQL: &str = "CREATE TABLE IF NOT EXISTS keys (
    uid    TEXT PRIMARY KEY NOT NULL,
    key_ct BLOB NOT NULL
)";

pub struct KeyStore {
    conn: Connection,
    cipher: XChaCha20Poly1305,
}

impl KeyStore {
    /// Open (or create) the key store at `path`. Key material written through
    /// this handle is sealed under `master_key`; a store written with a
    /// different master key yields [`CryptoError::DecryptionFailed`] on read.
    pub fn open(path: &Path, master_key: &[u8; MASTER_KEY_SIZE]) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(CREATE_SQL)?;

        let cipher_key = blake3::derive_key(KDF_CONTEXT_KEY_STORE, master_key);
        let cipher = XChaCha20Poly1305::new((&cipher_key).into());

        tracing::info!(path = %path.display(), "opened key store");
        Ok(Self { conn, cipher })
    }

    /// Insert or atomically replace the key for `uid`. Replacement is how key
    /// renewal reaches the store.
    pub fn put_key(&self, uid: &Uid, key: &SecretKey) -> Result<()> {
        let sealed = self.seal(key)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO keys (uid, key_ct) VALUES (?1, ?2)",
            params![uid.to_hex(), sealed],
        )?;
        Ok(())
    }

    pub fn put_keys(&self, entries: &[(Uid, SecretKey)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO keys (uid, key_ct) VALUES (?1, ?2)")?;
            for (uid, key) in entries {
                let sealed = self.seal(key)?;
                stmt.execute(params![uid.to_hex(), sealed])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_key(&self, uid: &Uid) -> Result<SecretKey> {
        let sealed: Vec<u8> = self
            .conn
            .query_row(
                "SELECT key_ct FROM keys WHERE uid = ?1",
                params![uid.to_hex()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        self.open_sealed(&sealed)
    }

    pub fn delete_key(&self, uid: &Uid) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM keys WHERE uid = ?1", params![uid.to_hex()])?;
        Ok(affected > 0)
    }

    /// Every (UID, key) pair in the store. Loaded once at server startup to
    /// build the in-memory user map.
    pub fn all_keys(&self) -> Result<Vec<(Uid, SecretKey)>> {
        let mut stmt = self.conn.prepare("SELECT uid, key_ct FROM keys")?;
        let rows = stmt.query_map([], |row| {
            let uid_hex: String = row.get(0)?;
            let sealed: Vec<u8> = row.get(1)?;
            Ok((uid_hex, sealed))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (uid_hex, sealed) = row?;
            let uid = Uid::from_hex(&uid_hex)?;
            entries.push((uid, self.open_sealed(&sealed)?));
        }
        Ok(entries)
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM keys", [])?;
        Ok(())
    }

    // Returns nonce || ciphertext (24-byte nonce prepended).
    fn seal(&self, key: &SecretKey) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; XNONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, key.as_slice())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(XNONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open_sealed(&self, sealed: &[u8]) -> Result<SecretKey> {
        if sealed.len() < XNONCE_SIZE {
            return Err(CryptoError::DecryptionFailed.into());
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(XNONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if plaintext.len() != KEY_SIZE {
            return Err(CryptoError::DecryptionFailed.into());
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&plaintext);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellrock_shared::crypto;

    #[test]
    fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(&dir.path().join("keys.db"), &[7u8; 32]).unwrap();

        let uid = crypto::generate_uid();
        let key = crypto::generate_key();
        store.put_key(&uid, &key).unwrap();
        assert_eq!(store.get_key(&uid).unwrap(), key);
    }

    #[test]
    fn replace_is_atomic_per_uid() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(&dir.path().join("keys.db"), &[7u8; 32]).unwrap();

        let uid = crypto::generate_uid();
        store.put_key(&uid, &[1u8; 16]).unwrap();
        store.put_key(&uid, &[2u8; 16]).unwrap();

        assert_eq!(store.get_key(&uid).unwrap(), [2u8; 16]);
        assert_eq!(store.all_keys().unwrap().len(), 1);
    }

    #[test]
    fn wrong_master_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let uid = crypto::generate_uid();

        {
            let store = KeyStore::open(&path, &[7u8; 32]).unwrap();
            store.put_key(&uid, &crypto::generate_key()).unwrap();
        }

        let reopened = KeyStore::open(&path, &[8u8; 32]).unwrap();
        assert!(matches!(
            reopened.get_key(&uid),
            Err(StoreError::Crypto(CryptoError::DecryptionFailed))
        ));
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(&dir.path().join("keys.db"), &[7u8; 32]).unwrap();
        assert!(matches!(
            store.get_key(&crypto::generate_uid()),
            Err(StoreError::NotFound)
        ));
    }
}
