use rusqlite::params;

use bellrock_shared::Uid;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Register the symmetric peer edge {a, b}. Stored as two rows so that
    /// lookup by either endpoint is a single-column scan; re-adding an
    /// existing edge is a no-op. Self-edges are rejected.
    pub fn add_peer(&self, a: &Uid, b: &Uid) -> Result<()> {
        if a == b {
            return Err(StoreError::SelfEdge);
        }
        self.bulk(|conn| {
            let mut stmt = conn.prepare("INSERT OR IGNORE INTO peers (uid, peer) VALUES (?1, ?2)")?;
            stmt.execute(params![a.to_hex(), b.to_hex()])?;
            stmt.execute(params![b.to_hex(), a.to_hex()])?;
            Ok(())
        })
    }

    /// Delete the edge {a, b} in both directions.
    pub fn delete_peer(&self, a: &Uid, b: &Uid) -> Result<()> {
        self.conn().execute(
            "DELETE FROM peers WHERE (uid = ?1 AND peer = ?2) OR (uid = ?2 AND peer = ?1)",
            params![a.to_hex(), b.to_hex()],
        )?;
        self.commit_now()
    }

    /// Peers of `uid`, in stored (insertion) order.
    pub fn peers_of(&self, uid: &Uid) -> Result<Vec<Uid>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT peer FROM peers WHERE uid = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![uid.to_hex()], |row| row.get::<_, String>(0))?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(Uid::from_hex(&row?)?);
        }
        Ok(peers)
    }
}
