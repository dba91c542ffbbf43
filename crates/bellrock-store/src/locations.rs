use chrono::{DateTime, Utc};
use rusqlite::params;

use bellrock_shared::celltower::{CellTower, CoarseLocation};
use bellrock_shared::Uid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::UserLocation;

impl Database {
    /// Append one location interval for `uid`. This is the buffered
    /// high-volume path: rows accumulate in an open transaction and become
    /// durable on the next threshold or ticker commit.
    pub fn add_location(&self, uid: &Uid, location: &UserLocation) -> Result<()> {
        let coarse = location.location.ok_or(StoreError::UnresolvedLocation)?;

        self.begin_buffered()?;
        self.conn().execute(
            "INSERT INTO locations (uid, start_ts, end_ts, lat, lon, cell_tower)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            location_params(uid, location, coarse),
        )?;
        self.buffered_commit()
    }

    /// Bulk-append location intervals; commits once at the end.
    pub fn add_locations(&self, uid: &Uid, locations: &[UserLocation]) -> Result<()> {
        self.bulk(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO locations (uid, start_ts, end_ts, lat, lon, cell_tower)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for location in locations {
                let coarse = location.location.ok_or(StoreError::UnresolvedLocation)?;
                stmt.execute(location_params(uid, location, coarse))?;
            }
            Ok(())
        })
    }

    /// All stored location intervals of `uid`.
    pub fn locations_for(&self, uid: &Uid) -> Result<Vec<UserLocation>> {
        let mut stmt = self.conn().prepare(
            "SELECT start_ts, end_ts, lat, lon, cell_tower FROM locations WHERE uid = ?1",
        )?;
        let rows = stmt.query_map(params![uid.to_hex()], row_to_user_location)?;
        collect_locations(rows)
    }

    /// The location intervals of `uid` that overlap `[start, end]` -- not
    /// just those fully contained in it.
    pub fn locations_for_interval(
        &self,
        uid: &Uid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UserLocation>> {
        let mut stmt = self.conn().prepare(
            "SELECT start_ts, end_ts, lat, lon, cell_tower FROM locations
             WHERE uid = ?1 AND start_ts <= ?3 AND end_ts >= ?2",
        )?;
        let rows = stmt.query_map(
            params![
                uid.to_hex(),
                start.timestamp_millis(),
                end.timestamp_millis()
            ],
            row_to_user_location,
        )?;
        collect_locations(rows)
    }

    /// UIDs of every user with a location interval at the given coarse cell
    /// overlapping `[start, end]`, in stored order.
    pub fn users_at(
        &self,
        location: CoarseLocation,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Uid>> {
        let mut stmt = self.conn().prepare(
            "SELECT uid FROM locations
             WHERE lat = ?1 AND lon = ?2 AND start_ts <= ?4 AND end_ts >= ?3",
        )?;
        let rows = stmt.query_map(
            params![
                location.lat as f64,
                location.lon as f64,
                start.timestamp_millis(),
                end.timestamp_millis()
            ],
            |row| row.get::<_, String>(0),
        )?;

        let mut uids = Vec::new();
        for row in rows {
            uids.push(Uid::from_hex(&row?)?);
        }
        Ok(uids)
    }

    /// Retention sweep: drop every interval of `uid` that ended before
    /// `cutoff`. Returns the number of rows removed.
    pub fn delete_locations_before(&self, uid: &Uid, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM locations WHERE uid = ?1 AND end_ts < ?2",
            params![uid.to_hex(), cutoff.timestamp_millis()],
        )?;
        self.commit_now()?;
        Ok(removed)
    }
}

type LocationParams = (String, i64, i64, f64, f64, i64);

fn location_params(uid: &Uid, location: &UserLocation, coarse: CoarseLocation) -> LocationParams {
    (
        uid.to_hex(),
        location.start.timestamp_millis(),
        location.end.timestamp_millis(),
        coarse.lat as f64,
        coarse.lon as f64,
        location.cell_tower.pack() as i64,
    )
}

fn row_to_user_location(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserLocation> {
    let start_ts: i64 = row.get(0)?;
    let end_ts: i64 = row.get(1)?;
    let lat: f64 = row.get(2)?;
    let lon: f64 = row.get(3)?;
    let packed: i64 = row.get(4)?;

    let start = DateTime::from_timestamp_millis(start_ts)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, start_ts))?;
    let end = DateTime::from_timestamp_millis(end_ts)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(1, end_ts))?;

    Ok(UserLocation {
        start,
        end,
        location: Some(CoarseLocation::new(lat as f32, lon as f32)),
        cell_tower: CellTower::unpack(packed as u64),
    })
}

fn collect_locations(
    rows: impl Iterator<Item = rusqlite::Result<UserLocation>>,
) -> Result<Vec<UserLocation>> {
    let mut locations = Vec::new();
    for row in rows {
        locations.push(row?);
    }
    Ok(locations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellrock_shared::crypto;
    use chrono::TimeZone;

    fn open_temp(dir: &tempfile::TempDir) -> Database {
        Database::open(
            &dir.path().join("main.db"),
            &dir.path().join("keys.db"),
            &[0xAB; 32],
        )
        .unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn interval(start: i64, end: i64, lat: f32, lon: f32) -> UserLocation {
        UserLocation::new(
            t(start),
            t(end),
            Some(CoarseLocation::new(lat, lon)),
            CellTower::new(234, 15, 6283, 74),
        )
    }

    #[test]
    fn interval_query_returns_overlaps_not_containment() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);
        let uid = crypto::generate_uid();

        // Straddles the query start, fully inside, straddles the end, disjoint.
        db.add_locations(
            &uid,
            &[
                interval(0, 120, 52.21, 0.09),
                interval(150, 160, 52.21, 0.09),
                interval(190, 300, 52.21, 0.09),
                interval(400, 500, 52.21, 0.09),
            ],
        )
        .unwrap();

        let hits = db.locations_for_interval(&uid, t(100), t(200)).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(db.locations_for(&uid).unwrap().len(), 4);
    }

    #[test]
    fn users_at_matches_cell_and_interval() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);
        let (a, b, c) = (
            crypto::generate_uid(),
            crypto::generate_uid(),
            crypto::generate_uid(),
        );

        db.add_locations(&a, &[interval(100, 200, 52.21, 0.09)])
            .unwrap();
        db.add_locations(&b, &[interval(150, 250, 52.21, 0.09)])
            .unwrap();
        // Same time, different cell.
        db.add_locations(&c, &[interval(100, 200, 48.85, 2.35)])
            .unwrap();

        let here = CoarseLocation::new(52.21, 0.09);
        let hits = db.users_at(here, t(180), t(190)).unwrap();
        assert_eq!(hits, vec![a, b]);

        assert!(db.users_at(here, t(300), t(400)).unwrap().is_empty());
    }

    #[test]
    fn buffered_rows_become_visible_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);
        let uid = crypto::generate_uid();

        db.add_location(&uid, &interval(0, 10, 52.21, 0.09)).unwrap();
        assert_eq!(db.pending_rows(), 1);

        // Reads on the same connection see the open transaction; flushing
        // makes the row durable and resets the buffer.
        db.flush().unwrap();
        assert_eq!(db.pending_rows(), 0);
        assert_eq!(db.locations_for(&uid).unwrap().len(), 1);
    }

    #[test]
    fn unresolved_location_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);
        let uid = crypto::generate_uid();

        let bare = UserLocation::new(t(0), t(10), None, CellTower::new(1, 1, 1, 1));
        assert!(matches!(
            db.add_location(&uid, &bare),
            Err(StoreError::UnresolvedLocation)
        ));
    }

    #[test]
    fn retention_sweep_drops_old_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_temp(&dir);
        let uid = crypto::generate_uid();

        db.add_locations(
            &uid,
            &[
                interval(0, 50, 52.21, 0.09),
                interval(60, 99, 52.21, 0.09),
                interval(90, 150, 52.21, 0.09),
            ],
        )
        .unwrap();

        let removed = db.delete_locations_before(&uid, t(100)).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.locations_for(&uid).unwrap().len(), 1);
    }
}
