//! AID resolution: candidate construction and the trial-decryption search.
//!
//! For each observation in a batch the resolver tries three candidate
//! sources in priority order, short-circuiting on the first key that
//! decrypts the AID to the candidate's UID:
//!
//! 1. the observer's recent acquaintances (in-memory window, most recent
//!    first),
//! 2. the observer's declared peers,
//! 3. users co-located with the observer around the observation time.
//!
//! Sources 1 and 2 are tiny and searched sequentially. Source 3 can reach
//! thousands of users in a busy cell, so above a threshold the attempts fan
//! out across scoped worker threads that stop as soon as any of them finds
//! the match. Everything the candidate sources need from the store is read
//! once per batch, before any observation is attempted; a failed read
//! therefore aborts the batch before anything is written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use bellrock_shared::celltower::CoarseLocation;
use bellrock_shared::{Aid, Uid};
use bellrock_store::{Database, ObservationBatch};

use crate::error::ServerError;
use crate::user_manager::{UserManager, UserRecord};

pub type SharedDb = Arc<Mutex<Database>>;

pub struct Resolver {
    db: SharedDb,
    users: Arc<UserManager>,
    parallel_threshold: usize,
}

/// Store-derived candidate context, computed once per batch.
struct BatchContext {
    peers: Vec<Arc<UserRecord>>,
    co_located: HashMap<CoarseLocation, Vec<Arc<UserRecord>>>,
}

impl Resolver {
    pub fn new(db: SharedDb, users: Arc<UserManager>, parallel_threshold: usize) -> Self {
        Self {
            db,
            users,
            parallel_threshold,
        }
    }

    /// Attempt to identify the sender of every observation in the batch,
    /// then persist the whole batch (resolved or not) in one write. Returns
    /// the number of observations that were resolved.
    pub fn resolve_batch(&self, batch: &mut ObservationBatch) -> Result<usize, ServerError> {
        let observer = self
            .users
            .get(&batch.observer)
            .ok_or(ServerError::UserNotFound(batch.observer))?;

        if batch.is_empty() {
            return Ok(0);
        }

        let ctx = self.build_batch_context(batch)?;

        let mut resolved_count = 0;
        for obs in batch.observations.iter_mut() {
            let cell = obs.location.to_coarse();
            if let Some(user) = self.try_resolve(&observer, &obs.aid, cell, &ctx) {
                obs.resolved = Some(user.uid);
                observer.recent.lock().touch(user.uid);
                resolved_count += 1;
            }
        }

        self.db.lock().add_observations(batch)?;

        tracing::debug!(
            observer = %batch.observer,
            total = batch.len(),
            resolved = resolved_count,
            "resolved observation batch"
        );
        Ok(resolved_count)
    }

    /// Trial-decrypt against the whole fleet.
    ///
    /// Benchmark hook only: this is the brute force the candidate heuristics
    /// exist to avoid, kept so their savings can be measured. Production
    /// ingest must never call it.
    pub fn resolve_exhaustive(&self, aid: &Aid) -> Option<Uid> {
        let everyone = self.users.all_records();
        search_parallel(aid, &everyone).map(|user| user.uid)
    }

    // One round of store reads covering the whole batch: the observer's peer
    // set, and per coarse cell the observer visited in the batch's time
    // range, the users that overlapped them there.
    fn build_batch_context(&self, batch: &ObservationBatch) -> Result<BatchContext, ServerError> {
        let db = self.db.lock();

        let peer_uids = db.peers_of(&batch.observer)?;
        let peers = self.users.get_many(&peer_uids);

        let mut co_located: HashMap<CoarseLocation, Vec<Arc<UserRecord>>> = HashMap::new();
        if let (Some(first), Some(last)) = (batch.first(), batch.last()) {
            let intervals =
                db.locations_for_interval(&batch.observer, first.time, last.time)?;
            for interval in intervals {
                let Some(cell) = interval.location else {
                    continue;
                };
                if co_located.contains_key(&cell) {
                    continue;
                }
                let uids = db.users_at(cell, interval.start, interval.end)?;
                co_located.insert(cell, self.users.get_many(&uids));
            }
        }

        Ok(BatchContext { peers, co_located })
    }

    fn try_resolve(
        &self,
        observer: &UserRecord,
        aid: &Aid,
        cell: CoarseLocation,
        ctx: &BatchContext,
    ) -> Option<Arc<UserRecord>> {
        // Source 1: recent acquaintances, most recent first. The window lock
        // is released before any decryption happens.
        let recent_uids: Vec<Uid> = observer.recent.lock().iter().copied().collect();
        let recent = self.users.get_many(&recent_uids);
        if let Some(user) = search_sequential(aid, &recent) {
            return Some(user);
        }

        // Source 2: declared peers.
        if let Some(user) = search_sequential(aid, &ctx.peers) {
            return Some(user);
        }

        // Source 3: users co-located at the observation's coarse cell. An
        // observation outside every known cell has no third source.
        let candidates = ctx.co_located.get(&cell)?;
        if candidates.len() > self.parallel_threshold {
            search_parallel(aid, candidates)
        } else {
            search_sequential(aid, candidates)
        }
    }
}

fn search_sequential(aid: &Aid, candidates: &[Arc<UserRecord>]) -> Option<Arc<UserRecord>> {
    candidates
        .iter()
        .find(|user| user.matches_aid(aid))
        .cloned()
}

/// Fan the trial decryptions out across scoped worker threads. The search
/// wants *any* match: the first worker to find one raises the stop flag and
/// the others bail out at their next attempt.
fn search_parallel(aid: &Aid, candidates: &[Arc<UserRecord>]) -> Option<Arc<UserRecord>> {
    if candidates.is_empty() {
        return None;
    }

    let workers = num_cpus::get().clamp(1, candidates.len());
    let chunk_size = candidates.len().div_ceil(workers);

    let found = AtomicBool::new(false);
    let result: Mutex<Option<Arc<UserRecord>>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for part in candidates.chunks(chunk_size) {
            let found = &found;
            let result = &result;
            scope.spawn(move || {
                for user in part {
                    if found.load(Ordering::Relaxed) {
                        return;
                    }
                    if user.matches_aid(aid) {
                        found.store(true, Ordering::Relaxed);
                        *result.lock() = Some(user.clone());
                        return;
                    }
                }
            });
        }
    });

    result.into_inner()
}
