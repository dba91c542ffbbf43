//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `peers`, `observations` and
//! `locations`. Device keys live in a separate database file, see
//! [`crate::keystore`].

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    uid TEXT PRIMARY KEY NOT NULL             -- hex-encoded 8-byte UID
);

-- ----------------------------------------------------------------
-- Peers: two rows per logical edge so that lookup by either
-- endpoint is a single-column scan
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS peers (
    uid  TEXT NOT NULL,                       -- hex UID
    peer TEXT NOT NULL,                       -- hex UID

    UNIQUE (uid, peer)
);

CREATE INDEX IF NOT EXISTS idx_peers_uid ON peers(uid);

-- ----------------------------------------------------------------
-- Observations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS observations (
    observer_uid  TEXT NOT NULL,              -- hex UID of the listening device
    aid           TEXT NOT NULL,              -- hex 16-byte anonymous ID
    resolved_uid  TEXT,                       -- hex UID, back-filled by the resolver
    ts            INTEGER NOT NULL,           -- epoch milliseconds
    lat           REAL NOT NULL,
    lon           REAL NOT NULL,
    location_name TEXT
);

CREATE INDEX IF NOT EXISTS idx_observations_observer ON observations(observer_uid);
CREATE INDEX IF NOT EXISTS idx_observations_resolved ON observations(resolved_uid);

-- ----------------------------------------------------------------
-- User location intervals
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS locations (
    uid        TEXT NOT NULL,                 -- hex UID
    start_ts   INTEGER NOT NULL,              -- epoch milliseconds
    end_ts     INTEGER NOT NULL,
    lat        REAL NOT NULL,                 -- coarse latitude (f32 quantum)
    lon        REAL NOT NULL,
    cell_tower INTEGER NOT NULL,              -- packed MCC|MNC|LAC|CID

    CHECK (start_ts <= end_ts)
);

CREATE INDEX IF NOT EXISTS idx_locations_uid ON locations(uid);
CREATE INDEX IF NOT EXISTS idx_locations_place ON locations(lat, lon);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
