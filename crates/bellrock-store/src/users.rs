use rusqlite::params;

use bellrock_shared::crypto::SecretKey;
use bellrock_shared::Uid;

use crate::database::Database;
use crate::error::{map_constraint, Result, StoreError};

impl Database {
    /// Register a user. Rejected with [`StoreError::Duplicate`] and no side
    /// effects when the UID is already taken.
    pub fn add_user(&self, uid: &Uid, key: &SecretKey) -> Result<()> {
        self.conn()
            .execute("INSERT INTO users (uid) VALUES (?1)", params![uid.to_hex()])
            .map_err(map_constraint)?;
        self.commit_now()?;

        if let Err(e) = self.keystore().put_key(uid, key) {
            // Do not leave a keyless user behind.
            let _ = self
                .conn()
                .execute("DELETE FROM users WHERE uid = ?1", params![uid.to_hex()]);
            let _ = self.commit_now();
            return Err(e);
        }
        Ok(())
    }

    /// Bulk registration: one transaction for the UID rows, one batch for the
    /// key store. Much faster than [`add_user`] in a loop.
    ///
    /// [`add_user`]: Database::add_user
    pub fn add_users(&self, users: &[(Uid, SecretKey)]) -> Result<()> {
        self.bulk(|conn| {
            let mut stmt = conn.prepare("INSERT INTO users (uid) VALUES (?1)")?;
            for (uid, _) in users {
                stmt.execute(params![uid.to_hex()]).map_err(map_constraint)?;
            }
            Ok(())
        })?;
        self.keystore().put_keys(users)
    }

    /// Delete a user and every row that references them: key, peer edges in
    /// either column, observations as observer or resolved subject, and
    /// location history. Not reversible.
    pub fn delete_user(&self, uid: &Uid) -> Result<()> {
        let hex = uid.to_hex();
        self.bulk(|conn| {
            let removed = conn.execute("DELETE FROM users WHERE uid = ?1", params![hex])?;
            if removed == 0 {
                return Err(StoreError::NotFound);
            }
            conn.execute(
                "DELETE FROM peers WHERE uid = ?1 OR peer = ?1",
                params![hex],
            )?;
            conn.execute(
                "DELETE FROM observations WHERE observer_uid = ?1 OR resolved_uid = ?1",
                params![hex],
            )?;
            conn.execute("DELETE FROM locations WHERE uid = ?1", params![hex])?;
            Ok(())
        })?;
        self.keystore().delete_key(uid)?;
        Ok(())
    }

    pub fn contains_user(&self, uid: &Uid) -> Result<bool> {
        let present: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE uid = ?1)",
            params![uid.to_hex()],
            |row| row.get(0),
        )?;
        Ok(present == 1)
    }

    pub fn all_uids(&self) -> Result<Vec<Uid>> {
        let mut stmt = self.conn().prepare("SELECT uid FROM users")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut uids = Vec::new();
        for row in rows {
            uids.push(Uid::from_hex(&row?)?);
        }
        Ok(uids)
    }

    /// Insert or atomically replace the key for `uid` (key renewal).
    pub fn put_key(&self, uid: &Uid, key: &SecretKey) -> Result<()> {
        self.keystore().put_key(uid, key)
    }

    pub fn get_key(&self, uid: &Uid) -> Result<SecretKey> {
        self.keystore().get_key(uid)
    }

    /// Every registered (UID, key) pair; the server's startup load.
    pub fn all_keys(&self) -> Result<Vec<(Uid, SecretKey)>> {
        self.keystore().all_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellrock_shared::crypto;

    fn open_temp(dir: &tempfile::TempDir) -> Database {
        Database::open(
            &dir.path().join("main.db"),
            &dir.path().join("keys.db"),
            &[0xAB; 32],
        )
        .unwrap()
    }

    #[test]
    fn add_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);

        let uid = crypto::generate_uid();
        let key = crypto::generate_key();
        db.add_user(&uid, &key).unwrap();

        assert!(db.contains_user(&uid).unwrap());
        assert_eq!(db.get_key(&uid).unwrap(), key);
        assert_eq!(db.all_uids().unwrap(), vec![uid]);
    }

    #[test]
    fn duplicate_registration_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);

        let uid = crypto::generate_uid();
        let key = crypto::generate_key();
        db.add_user(&uid, &key).unwrap();

        let second = crypto::generate_key();
        assert!(matches!(
            db.add_user(&uid, &second),
            Err(StoreError::Duplicate)
        ));
        // The original key survives the rejected attempt.
        assert_eq!(db.get_key(&uid).unwrap(), key);
    }

    #[test]
    fn bulk_registration() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);

        let users: Vec<_> = (0..10)
            .map(|_| (crypto::generate_uid(), crypto::generate_key()))
            .collect();
        db.add_users(&users).unwrap();

        assert_eq!(db.all_uids().unwrap().len(), 10);
        assert_eq!(db.all_keys().unwrap().len(), 10);
        for (uid, key) in &users {
            assert_eq!(db.get_key(uid).unwrap(), *key);
        }
    }

    #[test]
    fn key_replace_serves_renewal() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);

        let uid = crypto::generate_uid();
        db.add_user(&uid, &[1u8; 16]).unwrap();
        db.put_key(&uid, &[2u8; 16]).unwrap();

        assert_eq!(db.get_key(&uid).unwrap(), [2u8; 16]);
        assert_eq!(db.all_keys().unwrap().len(), 1);
    }

    #[test]
    fn delete_missing_user_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);
        assert!(matches!(
            db.delete_user(&crypto::generate_uid()),
            Err(StoreError::NotFound)
        ));
    }
}
