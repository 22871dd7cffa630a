//! Singleton builds in progress across threads.
//!
//! A resolver's own path only sees cycles on its thread. When two threads
//! each build one singleton of a cycle, each ends up blocked on the other's
//! `OnceCell`. The builds table records which thread is building which
//! singleton and which singleton each thread is blocked on, so a thread
//! about to block can see that the wait would close a loop.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::trace;

use crate::key::ServiceKey;
use crate::registration::Registration;

/// Identity of one registration record.
type RecordId = usize;

fn record_id(record: &Registration) -> RecordId {
    record as *const Registration as usize
}

#[derive(Default)]
struct Edges {
    building: HashMap<RecordId, ThreadId>,
    waiting: HashMap<ThreadId, (RecordId, ServiceKey)>,
}

#[derive(Default)]
pub(crate) struct SingletonBuilds {
    edges: Mutex<Edges>,
}

impl SingletonBuilds {
    /// Records that the current thread may block on `record`.
    ///
    /// Fails with the services along the loop when the thread building
    /// `record` is, directly or through others, waiting on this thread.
    pub(crate) fn wait_on(&self, record: &Registration) -> Result<WaitGuard<'_>, Vec<ServiceKey>> {
        let me = thread::current().id();
        let id = record_id(record);
        let mut edges = self.edges.lock();

        let mut services = Vec::new();
        let mut next = id;
        for _ in 0..=edges.waiting.len() {
            let Some(&owner) = edges.building.get(&next) else {
                break;
            };
            if owner == me {
                trace!(service = %record.service, "Cross-thread singleton cycle detected");
                return Err(services);
            }
            let Some(&(blocked_on, service)) = edges.waiting.get(&owner) else {
                break;
            };
            services.push(service);
            next = blocked_on;
        }

        edges.waiting.insert(me, (id, record.service));
        Ok(WaitGuard { builds: self, me })
    }

    /// Records that the current thread is running the build of `record`.
    pub(crate) fn build(&self, record: &Registration) -> BuildGuard<'_> {
        let me = thread::current().id();
        let id = record_id(record);
        let mut edges = self.edges.lock();
        edges.waiting.remove(&me);
        edges.building.insert(id, me);
        BuildGuard { builds: self, id }
    }
}

pub(crate) struct WaitGuard<'b> {
    builds: &'b SingletonBuilds,
    me: ThreadId,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.builds.edges.lock().waiting.remove(&self.me);
    }
}

pub(crate) struct BuildGuard<'b> {
    builds: &'b SingletonBuilds,
    id: RecordId,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.builds.edges.lock().building.remove(&self.id);
    }
}
