//! Dependency registry: every registration, indexed by service.
//!
//! Each service maps to its records in registration order. Named and keyed
//! records stay in that list as well, and are additionally indexed by
//! `(service, name)` / `(service, key)` for direct lookups.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::key::{BindingKey, Selector, ServiceKey};
use crate::registration::Registration;

/// Stores all registrations of one container.
///
/// The registry can be extended at any time; lookups return clones of the
/// record list so no shard lock is held while a record is activated.
#[derive(Default)]
pub(crate) struct Registry {
    records: DashMap<ServiceKey, Vec<Arc<Registration>>>,
    named: DashMap<(ServiceKey, Arc<str>), Arc<Registration>>,
    keyed: DashMap<(ServiceKey, BindingKey), Arc<Registration>>,
    sequence: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number for the next record.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Appends a record to its service's list.
    pub fn add(&self, record: Arc<Registration>) {
        debug!(
            service = %record.service,
            lifetime = %record.lifetime,
            sequence = record.sequence,
            "Registered dependency"
        );
        self.records.entry(record.service).or_default().push(record);
    }

    /// Every record of `key`, in registration order.
    pub fn find_all(&self, key: &ServiceKey) -> Vec<Arc<Registration>> {
        self.records
            .get(key)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    pub fn find_first(&self, key: &ServiceKey) -> Option<Arc<Registration>> {
        self.records.get(key).and_then(|list| list.first().cloned())
    }

    pub fn find_named(&self, key: &ServiceKey, name: &str) -> Option<Arc<Registration>> {
        self.named
            .get(&(*key, Arc::from(name)))
            .map(|entry| entry.value().clone())
    }

    pub fn find_keyed(&self, key: &ServiceKey, binding: &BindingKey) -> Option<Arc<Registration>> {
        self.keyed
            .get(&(*key, binding.clone()))
            .map(|entry| entry.value().clone())
    }

    /// The single record a named or keyed selector points to, or the first
    /// record for the default selector.
    pub fn find_selected(&self, key: &ServiceKey, selector: &Selector) -> Option<Arc<Registration>> {
        match selector {
            Selector::Default => self.find_first(key),
            Selector::Named(name) => self.find_named(key, name),
            Selector::Keyed(binding) => self.find_keyed(key, binding),
        }
    }

    /// Indexes `record` under `name`, dropping its previous name.
    ///
    /// The last record registered under a name wins.
    pub fn index_named(&self, record: &Arc<Registration>, name: Arc<str>, previous: Option<Arc<str>>) {
        if let Some(previous) = previous {
            self.named
                .remove_if(&(record.service, previous), |_, indexed| Arc::ptr_eq(indexed, record));
        }
        if let Some(displaced) = self.named.insert((record.service, name.clone()), record.clone()) {
            if !Arc::ptr_eq(&displaced, record) {
                debug!(service = %record.service, name = %name, "Named binding replaced");
            }
        }
    }

    /// Indexes `record` under `key`, dropping its previous key.
    pub fn index_keyed(&self, record: &Arc<Registration>, key: BindingKey, previous: Option<BindingKey>) {
        if let Some(previous) = previous {
            self.keyed
                .remove_if(&(record.service, previous), |_, indexed| Arc::ptr_eq(indexed, record));
        }
        if let Some(displaced) = self.keyed.insert((record.service, key.clone()), record.clone()) {
            if !Arc::ptr_eq(&displaced, record) {
                debug!(service = %record.service, key = ?key, "Keyed binding replaced");
            }
        }
    }

    /// Swaps `old` for `new` in place, keeping its position and indexes.
    ///
    /// Returns `false` when `old` is no longer registered.
    pub fn replace(&self, old: &Arc<Registration>, new: Arc<Registration>) -> bool {
        let swapped = self
            .records
            .get_mut(&old.service)
            .and_then(|mut list| {
                list.iter_mut()
                    .find(|slot| Arc::ptr_eq(slot, old))
                    .map(|slot| *slot = new.clone())
            })
            .is_some();

        if swapped {
            old.supersede(&new);
            if let Some(name) = new.name() {
                self.named.insert((new.service, name), new.clone());
            }
            if let Some(key) = new.key() {
                self.keyed.insert((new.service, key), new.clone());
            }
            trace!(service = %new.service, sequence = new.sequence, "Replaced registration");
        }
        swapped
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.records.get(key).is_some_and(|list| !list.is_empty())
    }

    pub fn contains_selected(&self, key: &ServiceKey, selector: &Selector) -> bool {
        self.find_selected(key, selector).is_some()
    }

    /// Type names of every registered service, for suggestions.
    pub fn registered_names(&self) -> Vec<&'static str> {
        self.records.iter().map(|entry| entry.key().type_name()).collect()
    }

    /// Every record, grouped by service.
    pub fn snapshot(&self) -> Vec<(ServiceKey, Vec<Arc<Registration>>)> {
        self.records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Number of records across all services.
    pub fn len(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.named.clear();
        self.keyed.clear();
        self.records.clear();
    }
}
