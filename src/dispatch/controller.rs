//! Global registry of live dispatchers.
//!
//! An entry exists exactly while its dispatcher is alive: it is inserted
//! before the dispatcher performs any fallible query and removed when the
//! dispatcher tears down. Insertion is atomic insert-if-absent, so two
//! discoverers racing on the same entity cannot both win.

use super::cache::{FrontendCache, ProcessSnapshot, SystemSnapshot};
use super::dispatcher::Dispatcher;
use super::entity::EntityId;
use super::error::DispatchError;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(20);

pub struct DispatcherController {
    registry: RwLock<HashMap<EntityId, Arc<Dispatcher>>>,
    seen: Mutex<BTreeSet<EntityId>>,
    terminating: AtomicBool,
    grace: Duration,
}

impl DispatcherController {
    pub fn new(grace: Duration) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            seen: Mutex::new(BTreeSet::new()),
            terminating: AtomicBool::new(false),
            grace,
        }
    }

    /// Claims the registry slot for `dispatcher`.
    pub(crate) fn register_dispatcher(
        &self,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<(), DispatchError> {
        let id = dispatcher.id();
        let mut registry = self.registry.write();
        if self.terminating.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown(id));
        }
        match registry.entry(id) {
            Entry::Occupied(_) => Err(DispatchError::AlreadyDispatched(id)),
            Entry::Vacant(slot) => {
                slot.insert(dispatcher);
                self.seen.lock().insert(id);
                debug!(entity = %id, "dispatcher registered");
                Ok(())
            }
        }
    }

    /// Removes `id`. No-op if it is not registered.
    pub fn deregister_dispatcher(&self, id: EntityId) {
        if self.registry.write().remove(&id).is_some() {
            debug!(entity = %id, "dispatcher deregistered");
        }
    }

    /// Snapshot of registered ids, sorted.
    pub fn active_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.registry.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of registered process ids.
    pub fn active_pids(&self) -> HashSet<u32> {
        self.registry.read().keys().filter_map(|id| id.pid()).collect()
    }

    pub fn is_active(&self, id: EntityId) -> bool {
        self.registry.read().contains_key(&id)
    }

    /// The live dispatcher for `id`, if any.
    pub fn get(&self, id: EntityId) -> Option<Arc<Dispatcher>> {
        self.registry.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Every id ever registered, including ones since deregistered.
    pub fn all_ids_seen(&self) -> Vec<EntityId> {
        self.seen.lock().iter().copied().collect()
    }

    /// Snapshot of every registered process cache, ordered by pid.
    pub fn collect_all_process_info(&self) -> Vec<ProcessSnapshot> {
        let caches: Vec<FrontendCache> =
            self.registry.read().values().map(|d| d.cache()).collect();
        let mut snapshots: Vec<ProcessSnapshot> = caches
            .into_iter()
            .filter_map(|cache| match cache {
                FrontendCache::Process(p) => Some(p.snapshot()),
                FrontendCache::System(_) => None,
            })
            .collect();
        snapshots.sort_by_key(|s| s.pid);
        snapshots
    }

    /// Snapshot of the system cache, if the system dispatcher is alive.
    pub fn collect_system_info(&self) -> Option<SystemSnapshot> {
        match self.get(EntityId::System)?.cache() {
            FrontendCache::System(s) => Some(s.snapshot()),
            FrontendCache::Process(_) => None,
        }
    }

    /// Stops the whole tree.
    ///
    /// Sets every exit flag, waits at most the grace period for dispatchers
    /// to deregister themselves, then clears whatever is left. New
    /// registrations are refused from here on.
    pub fn terminate_all(&self, signal: Option<i32>) {
        let dispatchers: Vec<Arc<Dispatcher>> = {
            let registry = self.registry.write();
            self.terminating.store(true, Ordering::SeqCst);
            registry.values().cloned().collect()
        };
        match signal {
            Some(sig) => info!(signal = sig, count = dispatchers.len(), "terminating all dispatchers"),
            None => info!(count = dispatchers.len(), "terminating all dispatchers"),
        }
        for dispatcher in &dispatchers {
            dispatcher.request_exit();
        }
        drop(dispatchers);

        let deadline = Instant::now() + self.grace;
        while !self.is_empty() && Instant::now() < deadline {
            std::thread::sleep(POLL);
        }

        let mut registry = self.registry.write();
        if !registry.is_empty() {
            let mut left: Vec<EntityId> = registry.keys().copied().collect();
            left.sort_unstable();
            warn!(count = left.len(), ids = ?left, "grace period elapsed, detaching dispatchers");
            registry.clear();
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }
}
