//! The transport-neutral server facade.
//!
//! [`BellrockServer`] wires the persistent store, the in-memory user view,
//! the cell-tower map and the resolver together, and exposes the calls the
//! ingest surface forwards to. All handles are constructed at startup and
//! threaded through explicitly; there are no process-wide globals.

use std::sync::Arc;

use parking_lot::Mutex;

use bellrock_shared::celltower::CellTowerMap;
use bellrock_shared::crypto::SecretKey;
use bellrock_shared::{Aid, Uid};
use bellrock_store::{Database, Observation, ObservationBatch, UserLocation};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::resolver::{Resolver, SharedDb};
use crate::user_manager::UserManager;

pub struct BellrockServer {
    db: SharedDb,
    users: Arc<UserManager>,
    resolver: Resolver,
    cells: Arc<CellTowerMap>,
}

impl BellrockServer {
    /// Open the databases and the cell-tower map named by `config` and bring
    /// up the in-memory state.
    pub fn open(config: &ServerConfig) -> Result<Self, ServerError> {
        let mut database =
            Database::open(&config.db_path, &config.keystore_path, &config.master_key)?;
        database.set_commit_buffer(config.commit_buffer);

        let cells = match &config.cell_map_path {
            Some(path) => CellTowerMap::load(path)?,
            None => {
                tracing::warn!("no cell map configured; cell-tower lookups will miss");
                CellTowerMap::empty()
            }
        };

        Self::new(database, cells, config)
    }

    pub fn new(
        database: Database,
        cells: CellTowerMap,
        config: &ServerConfig,
    ) -> Result<Self, ServerError> {
        let db: SharedDb = Arc::new(Mutex::new(database));
        let users = Arc::new(UserManager::load(&db.lock(), config.recent_window)?);
        let resolver = Resolver::new(db.clone(), users.clone(), config.parallel_threshold);
        Ok(Self {
            db,
            users,
            resolver,
            cells: Arc::new(cells),
        })
    }

    /// Register a device: fresh unique UID, fresh random key.
    pub fn register_user(&self) -> Result<(Uid, SecretKey), ServerError> {
        self.users.register(&self.db.lock())
    }

    /// Register `count` devices through one bulk write.
    pub fn register_users(&self, count: usize) -> Result<Vec<(Uid, SecretKey)>, ServerError> {
        self.users.register_many(&self.db.lock(), count)
    }

    /// Replace the device key. AIDs under the old key stop resolving.
    pub fn renew_key(&self, uid: &Uid) -> Result<SecretKey, ServerError> {
        self.users.renew_key(&self.db.lock(), uid)
    }

    /// Remove the user and every stored trace of them.
    pub fn delete_user(&self, uid: &Uid) -> Result<(), ServerError> {
        self.users.delete(&self.db.lock(), uid)
    }

    /// Declare the symmetric peer edge {a, b}.
    pub fn add_peer(&self, a: &Uid, b: &Uid) -> Result<(), ServerError> {
        if a == b {
            return Err(ServerError::SelfPeer);
        }
        self.require_user(a)?;
        self.require_user(b)?;
        Ok(self.db.lock().add_peer(a, b)?)
    }

    pub fn delete_peer(&self, a: &Uid, b: &Uid) -> Result<(), ServerError> {
        Ok(self.db.lock().delete_peer(a, b)?)
    }

    pub fn peers(&self, uid: &Uid) -> Result<Vec<Uid>, ServerError> {
        self.require_user(uid)?;
        Ok(self.db.lock().peers_of(uid)?)
    }

    /// Append one location interval to the user's history. A missing coarse
    /// position is filled in from the cell-tower map.
    pub fn add_location(&self, uid: &Uid, location: UserLocation) -> Result<(), ServerError> {
        self.require_user(uid)?;
        let location = self.resolve_location(location)?;
        Ok(self.db.lock().add_location(uid, &location)?)
    }

    /// Bulk variant of [`add_location`]; one commit for the whole sync.
    ///
    /// [`add_location`]: BellrockServer::add_location
    pub fn add_locations(
        &self,
        uid: &Uid,
        locations: Vec<UserLocation>,
    ) -> Result<(), ServerError> {
        self.require_user(uid)?;
        let locations = locations
            .into_iter()
            .map(|location| self.resolve_location(location))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.db.lock().add_locations(uid, &locations)?)
    }

    /// Resolve what can be resolved, then persist the whole batch. Returns
    /// the number of observations whose sender was identified.
    pub fn submit_observations(&self, mut batch: ObservationBatch) -> Result<usize, ServerError> {
        self.resolver.resolve_batch(&mut batch)
    }

    /// Stored observations recorded by `uid`. A resolved reference to a user
    /// that no longer exists is dropped from the returned row.
    pub fn observations(&self, uid: &Uid) -> Result<Vec<Observation>, ServerError> {
        self.require_user(uid)?;
        let mut observations = self.db.lock().observations_by_observer(uid)?;
        for obs in &mut observations {
            if let Some(resolved) = obs.resolved {
                if self.users.get(&resolved).is_none() {
                    tracing::warn!(
                        observer = %uid,
                        resolved = %resolved,
                        "observation resolves to a missing user; dropping the reference"
                    );
                    obs.resolved = None;
                }
            }
        }
        Ok(observations)
    }

    /// Benchmark hook: brute-force an AID against the whole fleet, ignoring
    /// the candidate heuristics. Not reachable from the ingest surface.
    pub fn resolve_exhaustive(&self, aid: &Aid) -> Option<Uid> {
        self.resolver.resolve_exhaustive(aid)
    }

    pub fn user_count(&self) -> usize {
        self.users.count()
    }

    /// Commit any buffered writes now; called from the periodic ticker and
    /// on shutdown.
    pub fn flush(&self) -> Result<(), ServerError> {
        Ok(self.db.lock().flush()?)
    }

    /// Truncate every table (key store included) and drop the in-memory
    /// state.
    pub fn clear(&self) -> Result<(), ServerError> {
        self.db.lock().clear()?;
        self.users.clear();
        Ok(())
    }

    fn require_user(&self, uid: &Uid) -> Result<(), ServerError> {
        if self.users.get(uid).is_none() {
            return Err(ServerError::UserNotFound(*uid));
        }
        Ok(())
    }

    fn resolve_location(&self, mut location: UserLocation) -> Result<UserLocation, ServerError> {
        if location.start > location.end {
            return Err(ServerError::BadRequest(
                "location interval ends before it starts".to_string(),
            ));
        }
        if location.location.is_none() {
            let coarse = self
                .cells
                .get(&location.cell_tower)
                .ok_or_else(|| ServerError::UnknownCellTower(location.cell_tower.pack()))?;
            location.location = Some(coarse);
        }
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellrock_shared::celltower::{CellTower, CoarseLocation};
    use bellrock_shared::crypto;
    use bellrock_store::Location;
    use chrono::{DateTime, TimeZone, Utc};

    fn open_server(dir: &tempfile::TempDir) -> BellrockServer {
        open_server_with_cells(dir, CellTowerMap::empty())
    }

    fn open_server_with_cells(dir: &tempfile::TempDir, cells: CellTowerMap) -> BellrockServer {
        let config = ServerConfig {
            db_path: dir.path().join("main.db"),
            keystore_path: dir.path().join("keys.db"),
            ..ServerConfig::default()
        };
        let database =
            Database::open(&config.db_path, &config.keystore_path, &config.master_key).unwrap();
        BellrockServer::new(database, cells, &config).unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn tower() -> CellTower {
        CellTower::new(234, 15, 6283, 74)
    }

    fn interval_at(start: i64, end: i64, lat: f32, lon: f32) -> UserLocation {
        UserLocation::new(
            t(start),
            t(end),
            Some(CoarseLocation::new(lat, lon)),
            tower(),
        )
    }

    fn batch_of(observer: Uid, aid: Aid, secs: i64, lat: f64, lon: f64) -> ObservationBatch {
        ObservationBatch::new(
            observer,
            vec![Observation::new(
                observer,
                aid,
                t(secs),
                Location::new(lat, lon),
            )],
        )
    }

    #[test]
    fn resolves_a_peer() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);

        let (a, _) = server.register_user().unwrap();
        let (b, key_b) = server.register_user().unwrap();
        server.add_peer(&a, &b).unwrap();

        let aid = crypto::anonymize(&b, &key_b);
        let resolved = server
            .submit_observations(batch_of(a, aid, 100, 52.21, 0.09))
            .unwrap();
        assert_eq!(resolved, 1);

        let stored = server.observations(&a).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].resolved, Some(b));
    }

    #[test]
    fn resolves_a_stranger_at_the_same_place() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);

        let (a, _) = server.register_user().unwrap();
        let (s, key_s) = server.register_user().unwrap();

        // Both were around (52.21, 0.09) when the AID was heard; no peer
        // edge between them.
        server
            .add_location(&a, interval_at(50, 150, 52.21, 0.09))
            .unwrap();
        server
            .add_location(&s, interval_at(80, 120, 52.21, 0.09))
            .unwrap();

        let aid = crypto::anonymize(&s, &key_s);
        let resolved = server
            .submit_observations(batch_of(a, aid, 100, 52.21, 0.09))
            .unwrap();
        assert_eq!(resolved, 1);
        assert_eq!(server.observations(&a).unwrap()[0].resolved, Some(s));
    }

    #[test]
    fn recent_window_resolves_after_the_peer_edge_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);

        let (a, _) = server.register_user().unwrap();
        let (b, key_b) = server.register_user().unwrap();
        server.add_peer(&a, &b).unwrap();

        let first = crypto::anonymize(&b, &key_b);
        assert_eq!(
            server
                .submit_observations(batch_of(a, first, 100, 52.21, 0.09))
                .unwrap(),
            1
        );

        // With the edge deleted and no location history at all, only the
        // recent-acquaintance window can explain the second resolution.
        server.delete_peer(&a, &b).unwrap();
        let second = crypto::anonymize(&b, &key_b);
        assert_eq!(
            server
                .submit_observations(batch_of(a, second, 200, 52.21, 0.09))
                .unwrap(),
            1
        );
    }

    #[test]
    fn unknown_key_stays_unresolved_but_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);

        let (a, _) = server.register_user().unwrap();
        let stranger_aid = crypto::anonymize(&crypto::generate_uid(), &crypto::generate_key());

        let resolved = server
            .submit_observations(batch_of(a, stranger_aid, 100, 52.21, 0.09))
            .unwrap();
        assert_eq!(resolved, 0);

        let stored = server.observations(&a).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].resolved, None);
        assert_eq!(stored[0].aid, stranger_aid);
    }

    #[test]
    fn deleting_a_user_erases_every_trace() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);

        let (a, _) = server.register_user().unwrap();
        let (b, key_b) = server.register_user().unwrap();
        server.add_peer(&a, &b).unwrap();

        let aid = crypto::anonymize(&b, &key_b);
        server
            .submit_observations(batch_of(a, aid, 100, 52.21, 0.09))
            .unwrap();

        server.delete_user(&b).unwrap();

        assert!(server.peers(&a).unwrap().is_empty());
        assert!(server.observations(&a).unwrap().is_empty());
        assert_eq!(server.user_count(), 1);
    }

    #[test]
    fn key_renewal_invalidates_old_aids() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);

        let (a, _) = server.register_user().unwrap();
        let (b, old_key) = server.register_user().unwrap();
        server.add_peer(&a, &b).unwrap();

        let new_key = server.renew_key(&b).unwrap();

        let stale = crypto::anonymize(&b, &old_key);
        assert_eq!(
            server
                .submit_observations(batch_of(a, stale, 100, 52.21, 0.09))
                .unwrap(),
            0
        );

        let fresh = crypto::anonymize(&b, &new_key);
        assert_eq!(
            server
                .submit_observations(batch_of(a, fresh, 200, 52.21, 0.09))
                .unwrap(),
            1
        );
    }

    #[test]
    fn self_peering_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);
        let (a, _) = server.register_user().unwrap();

        assert!(matches!(
            server.add_peer(&a, &a),
            Err(ServerError::SelfPeer)
        ));
    }

    #[test]
    fn location_resolves_through_the_cell_map() {
        let dir = tempfile::tempdir().unwrap();
        let cells = CellTowerMap::from_entries([(tower(), CoarseLocation::new(52.21, 0.09))]);
        let server = open_server_with_cells(&dir, cells);

        let (a, _) = server.register_user().unwrap();
        let (s, key_s) = server.register_user().unwrap();

        // Neither client supplies coordinates; both intervals resolve through
        // the tower.
        let bare = |start, end| UserLocation::new(t(start), t(end), None, tower());
        server.add_location(&a, bare(50, 150)).unwrap();
        server.add_location(&s, bare(80, 120)).unwrap();

        let aid = crypto::anonymize(&s, &key_s);
        assert_eq!(
            server
                .submit_observations(batch_of(a, aid, 100, 52.21, 0.09))
                .unwrap(),
            1
        );
    }

    #[test]
    fn unknown_tower_without_coordinates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);
        let (a, _) = server.register_user().unwrap();

        let bare = UserLocation::new(t(0), t(10), None, tower());
        assert!(matches!(
            server.add_location(&a, bare),
            Err(ServerError::UnknownCellTower(_))
        ));
    }

    #[test]
    fn observations_from_unknown_observer_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);

        let stranger = crypto::generate_uid();
        let aid = crypto::anonymize(&stranger, &crypto::generate_key());
        assert!(matches!(
            server.submit_observations(batch_of(stranger, aid, 100, 0.0, 0.0)),
            Err(ServerError::UserNotFound(_))
        ));
    }

    #[test]
    fn clear_resets_store_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let server = open_server(&dir);

        server.register_users(5).unwrap();
        assert_eq!(server.user_count(), 5);

        server.clear().unwrap();
        assert_eq!(server.user_count(), 0);

        // Clearing an already-empty store is a no-op.
        server.clear().unwrap();
    }
}
