//! The in-memory user view.
//!
//! The store owns the durable fields; this module holds the derived view the
//! resolver works against: one immutable [`UserRecord`] per registered user,
//! carrying the pre-built AES decrypt key schedule (key-schedule setup
//! dominates trial-decryption cost, so it is paid once per key) and the
//! observer's recent-acquaintance window behind its own guard.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use bellrock_shared::crypto::{self, Aes128, SecretKey};
use bellrock_shared::{Aid, Uid};
use bellrock_store::Database;

use crate::error::ServerError;
use crate::recent::RecentAcquaintances;

pub struct UserRecord {
    pub uid: Uid,
    pub key: SecretKey,
    cipher: Aes128,
    pub recent: Mutex<RecentAcquaintances>,
}

impl UserRecord {
    fn new(uid: Uid, key: SecretKey, window: usize) -> Self {
        Self {
            uid,
            key,
            cipher: crypto::init_cipher(&key),
            recent: Mutex::new(RecentAcquaintances::new(window)),
        }
    }

    /// One trial decryption: true iff `aid` was produced under this user's
    /// key.
    pub fn matches_aid(&self, aid: &Aid) -> bool {
        crypto::matches(&crypto::trial_decrypt(&self.cipher, aid), &self.uid)
    }
}

pub struct UserManager {
    users: RwLock<HashMap<Uid, Arc<UserRecord>>>,
    window: usize,
}

impl UserManager {
    /// Build the in-memory view from the key store.
    pub fn load(db: &Database, window: usize) -> Result<Self, ServerError> {
        let mut users = HashMap::new();
        for (uid, key) in db.all_keys()? {
            users.insert(uid, Arc::new(UserRecord::new(uid, key, window)));
        }
        tracing::info!(users = users.len(), "loaded user records");
        Ok(Self {
            users: RwLock::new(users),
            window,
        })
    }

    /// Register one user: a fresh unique UID and a fresh random key.
    pub fn register(&self, db: &Database) -> Result<(Uid, SecretKey), ServerError> {
        let uid = self.draw_unique_uid(db, &HashSet::new())?;
        let key = crypto::generate_key();
        db.add_user(&uid, &key)?;
        self.insert_record(uid, key);
        Ok((uid, key))
    }

    /// Register `count` users through one bulk store write. Much faster than
    /// [`register`] in a loop.
    ///
    /// [`register`]: UserManager::register
    pub fn register_many(
        &self,
        db: &Database,
        count: usize,
    ) -> Result<Vec<(Uid, SecretKey)>, ServerError> {
        let mut drawn = HashSet::new();
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let uid = self.draw_unique_uid(db, &drawn)?;
            drawn.insert(uid);
            batch.push((uid, crypto::generate_key()));
        }

        db.add_users(&batch)?;
        for (uid, key) in &batch {
            self.insert_record(*uid, *key);
        }
        Ok(batch)
    }

    /// Atomically replace the user's key. AIDs built under the old key stop
    /// resolving; the record (including its cached cipher and window) is
    /// rebuilt for the new key.
    pub fn renew_key(&self, db: &Database, uid: &Uid) -> Result<SecretKey, ServerError> {
        if !self.users.read().contains_key(uid) {
            return Err(ServerError::UserNotFound(*uid));
        }
        let key = crypto::generate_key();
        db.put_key(uid, &key)?;
        self.insert_record(*uid, key);
        Ok(key)
    }

    pub fn delete(&self, db: &Database, uid: &Uid) -> Result<(), ServerError> {
        db.delete_user(uid)?;
        self.users.write().remove(uid);
        Ok(())
    }

    pub fn get(&self, uid: &Uid) -> Option<Arc<UserRecord>> {
        self.users.read().get(uid).cloned()
    }

    /// Records for the given UIDs, in the given order. UIDs without a record
    /// (deleted since the caller learned of them) are skipped.
    pub fn get_many(&self, uids: &[Uid]) -> Vec<Arc<UserRecord>> {
        let users = self.users.read();
        uids.iter()
            .filter_map(|uid| users.get(uid).cloned())
            .collect()
    }

    /// Every record in the system. This is the brute-force search space; only
    /// the benchmark path iterates it.
    pub fn all_records(&self) -> Vec<Arc<UserRecord>> {
        self.users.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.users.read().len()
    }

    pub fn clear(&self) {
        self.users.write().clear();
    }

    fn insert_record(&self, uid: Uid, key: SecretKey) {
        self.users
            .write()
            .insert(uid, Arc::new(UserRecord::new(uid, key, self.window)));
    }

    // UIDs are drawn at random; redraw on the rare collision with either the
    // store or an in-flight bulk registration.
    fn draw_unique_uid(&self, db: &Database, taken: &HashSet<Uid>) -> Result<Uid, ServerError> {
        loop {
            let uid = crypto::generate_uid();
            if !taken.contains(&uid) && !db.contains_user(&uid)? {
                return Ok(uid);
            }
        }
    }
}
