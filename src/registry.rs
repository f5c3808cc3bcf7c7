use crate::clock::{Clock, SystemClock};
use crate::config::{FullPolicy, RegistryConfig};
use crate::error::RegistryFull;
use crate::formatter::{Snapshot, SnapshotRow};
use crate::notify::Notifier;
use crate::record::{ClientId, TelemetryRecord};
use crate::window::{Aggregate, SampleWindow};
use fxhash::FxHashMap;
use spdlog::{debug, info};
use std::net::SocketAddr;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Names one bound slot. Goes stale once the slot is cleared or handed to another client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    slot: usize,
    generation: u64,
}

impl EntryHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// An online/offline edge for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub client_id: ClientId,
    pub address: Option<SocketAddr>,
    pub offline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(EntryHandle),
    Malformed,
    RegistryFull,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub online: usize,
    pub offline: usize,
    pub transitions: Vec<StatusEvent>,
}

/// Read-only copy of one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryView {
    pub client_id: ClientId,
    pub records: Vec<TelemetryRecord>,
    pub last_address: Option<SocketAddr>,
    pub online: bool,
}

struct ClientEntry {
    client_id: ClientId,
    window: SampleWindow,
    last_address: Option<SocketAddr>,
    online: bool,
}

impl ClientEntry {
    fn new(client_id: ClientId, capacity: usize) -> Self {
        Self {
            client_id,
            window: SampleWindow::new(capacity),
            last_address: None,
            online: true,
        }
    }

    fn is_stale(&self, now: u64, threshold: u64) -> Option<bool> {
        self.window
            .latest()
            .map(|last| now.saturating_sub(last.timestamp) >= threshold)
    }

    fn event(&self) -> StatusEvent {
        StatusEvent {
            client_id: self.client_id,
            address: self.last_address,
            offline: !self.online,
        }
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<ClientEntry>,
}

impl Slot {
    fn bind(&mut self, client_id: ClientId, capacity: usize) {
        self.generation += 1;
        self.entry = Some(ClientEntry::new(client_id, capacity));
    }

    fn release(&mut self) -> Option<ClientId> {
        let entry = self.entry.take()?;
        self.generation += 1;
        Some(entry.client_id)
    }

    fn entry_for(&mut self, handle: EntryHandle) -> Option<&mut ClientEntry> {
        if self.generation != handle.generation {
            return None;
        }
        self.entry.as_mut()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bounded table of per-client sample windows.
///
/// Lock order is always `index` before any slot. Ingestion and reads share the index
/// read lock and only contend on the one slot they touch; the write lock is taken only
/// to bind or release slots.
pub struct Registry {
    config: RegistryConfig,
    slots: Box<[Mutex<Slot>]>,
    index: RwLock<FxHashMap<ClientId, usize>>,
    clock: Arc<dyn Clock>,
    notifier: Arc<Notifier>,
    subscribers: Mutex<Vec<Sender<StatusEvent>>>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        assert!(config.max_clients > 0, "max_clients must be greater than 0");
        assert!(
            config.window_capacity > 0,
            "window_capacity must be greater than 0"
        );
        let slots = (0..config.max_clients)
            .map(|_| Mutex::new(Slot::default()))
            .collect();
        let mut index = FxHashMap::default();
        index.reserve(config.max_clients);
        Self {
            config,
            slots,
            index: RwLock::new(index),
            clock,
            notifier: Arc::new(Notifier::new()),
            subscribers: Mutex::new(vec![]),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn now(&self) -> u64 {
        self.clock.now_secs()
    }

    /// Signalled after every mutating operation.
    pub fn notifier(&self) -> Arc<Notifier> {
        self.notifier.clone()
    }

    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        let (tx, rx) = channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    fn read_index(&self) -> RwLockReadGuard<'_, FxHashMap<ClientId, usize>> {
        self.index
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, FxHashMap<ClientId, usize>> {
        self.index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn find(&self, client_id: &ClientId) -> Option<EntryHandle> {
        let index = self.read_index();
        let slot = *index.get(client_id)?;
        let generation = lock(&self.slots[slot]).generation;
        Some(EntryHandle { slot, generation })
    }

    pub fn lookup_or_create(&self, client_id: ClientId) -> Result<EntryHandle, RegistryFull> {
        if let Some(handle) = self.find(&client_id) {
            return Ok(handle);
        }
        let mut index = self.write_index();
        let slot = self.bind_slot(&mut index, client_id)?;
        let generation = lock(&self.slots[slot]).generation;
        Ok(EntryHandle { slot, generation })
    }

    /// Caller holds the write lock. Returns the slot now bound to `client_id`.
    fn bind_slot(
        &self,
        index: &mut FxHashMap<ClientId, usize>,
        client_id: ClientId,
    ) -> Result<usize, RegistryFull> {
        if let Some(&slot) = index.get(&client_id) {
            return Ok(slot);
        }

        let free = self
            .slots
            .iter()
            .position(|slot| lock(slot).entry.is_none());
        let slot = match (free, self.config.full_policy) {
            (Some(slot), _) => slot,
            (None, FullPolicy::Drop) => {
                debug!("Registry full, dropping {}", client_id);
                return Err(RegistryFull { client_id });
            }
            (None, FullPolicy::EvictLeastRecent) => {
                let victim = self.least_recent_slot();
                if let Some(evicted) = lock(&self.slots[victim]).release() {
                    index.remove(&evicted);
                    info!("Evicted {} from slot {} to make room for {}", evicted, victim, client_id);
                }
                victim
            }
        };

        lock(&self.slots[slot]).bind(client_id, self.config.window_capacity);
        index.insert(client_id, slot);
        info!("New client {} in slot {}", client_id, slot);
        Ok(slot)
    }

    fn least_recent_slot(&self) -> usize {
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|&(_, slot)| {
                let slot = lock(slot);
                slot.entry
                    .as_ref()
                    .and_then(|e| e.window.latest())
                    .map(|r| r.timestamp)
                    .unwrap_or(0)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Appends `record` to its client's window and records the sender address.
    ///
    /// A reader never sees the window and address half-updated: both change under
    /// the slot lock.
    pub fn ingest(
        &self,
        record: TelemetryRecord,
        from: SocketAddr,
    ) -> Result<EntryHandle, RegistryFull> {
        let handle = {
            let index = self.read_index();
            index.get(&record.client_id).map(|&slot| {
                let mut guard = lock(&self.slots[slot]);
                Self::append(&mut guard, record, from);
                EntryHandle {
                    slot,
                    generation: guard.generation,
                }
            })
        };

        let handle = match handle {
            Some(handle) => handle,
            None => {
                let mut index = self.write_index();
                let slot = self.bind_slot(&mut index, record.client_id)?;
                let mut guard = lock(&self.slots[slot]);
                Self::append(&mut guard, record, from);
                EntryHandle {
                    slot,
                    generation: guard.generation,
                }
            }
        };

        self.notifier.notify();
        Ok(handle)
    }

    fn append(slot: &mut Slot, record: TelemetryRecord, from: SocketAddr) {
        if let Some(entry) = slot.entry.as_mut() {
            if entry.last_address.is_some_and(|prev| prev != from) {
                info!(
                    "{} moved from {} to {}",
                    entry.client_id,
                    entry.last_address.map(|a| a.to_string()).unwrap_or_default(),
                    from
                );
            }
            entry.last_address = Some(from);
            entry.window.push(record);
        }
    }

    /// Decodes one raw datagram and ingests it. Wrong-length bodies are dropped.
    pub fn ingest_datagram(&self, bytes: &[u8], from: SocketAddr) -> IngestOutcome {
        match TelemetryRecord::decode(bytes) {
            None => IngestOutcome::Malformed,
            Some(record) => match self.ingest(record, from) {
                Ok(handle) => IngestOutcome::Accepted(handle),
                Err(_) => IngestOutcome::RegistryFull,
            },
        }
    }

    pub fn aggregate(&self, handle: EntryHandle) -> Option<Aggregate> {
        let _index = self.read_index();
        let mut slot = lock(self.slots.get(handle.slot)?);
        slot.entry_for(handle)?.window.mean()
    }

    pub fn entry_view(&self, handle: EntryHandle) -> Option<EntryView> {
        let _index = self.read_index();
        let mut slot = lock(self.slots.get(handle.slot)?);
        let entry = slot.entry_for(handle)?;
        Some(EntryView {
            client_id: entry.client_id,
            records: entry.window.iter().copied().collect(),
            last_address: entry.last_address,
            online: entry.online,
        })
    }

    pub fn mark_offline(&self, handle: EntryHandle) -> bool {
        self.set_online(handle, false)
    }

    pub fn mark_online(&self, handle: EntryHandle) -> bool {
        self.set_online(handle, true)
    }

    /// Emits an event only on an actual edge.
    fn set_online(&self, handle: EntryHandle, online: bool) -> bool {
        let event = {
            let _index = self.read_index();
            let Some(slot) = self.slots.get(handle.slot) else {
                return false;
            };
            let mut slot = lock(slot);
            match slot.entry_for(handle) {
                Some(entry) if entry.online != online => {
                    entry.online = online;
                    entry.event()
                }
                _ => return false,
            }
        };
        self.publish(&[event]);
        true
    }

    /// One staleness pass over every occupied slot at instant `now`.
    ///
    /// Each entry is classified and flipped under its own lock; events go out after all
    /// locks are released.
    pub fn evaluate(&self, now: u64) -> EvaluationSummary {
        let threshold = self.config.offline_threshold_secs;
        let mut summary = EvaluationSummary::default();
        {
            let _index = self.read_index();
            for slot in self.slots.iter() {
                let mut slot = lock(slot);
                let Some(entry) = slot.entry.as_mut() else {
                    continue;
                };
                let Some(stale) = entry.is_stale(now, threshold) else {
                    continue;
                };
                if stale {
                    summary.offline += 1;
                } else {
                    summary.online += 1;
                }
                if entry.online == stale {
                    entry.online = !stale;
                    summary.transitions.push(entry.event());
                }
            }
        }
        self.publish(&summary.transitions);
        summary
    }

    fn publish(&self, events: &[StatusEvent]) {
        if events.is_empty() {
            return;
        }
        lock(&self.subscribers).retain(|tx| events.iter().all(|e| tx.send(*e).is_ok()));
        self.notifier.notify();
    }

    /// Returns how many clients were dropped.
    pub fn clear_all(&self) -> usize {
        let cleared = {
            let mut index = self.write_index();
            let cleared = self
                .slots
                .iter()
                .filter(|slot| lock(*slot).release().is_some())
                .count();
            index.clear();
            cleared
        };
        info!("Cleared all clients ({})", cleared);
        self.notifier.notify();
        cleared
    }

    /// Drops every client whose latest record is at least the offline threshold old,
    /// plus slots claimed by `lookup_or_create` that never received a record.
    pub fn clear_offline(&self) -> usize {
        let now = self.now();
        let threshold = self.config.offline_threshold_secs;
        let cleared = {
            let mut index = self.write_index();
            let mut cleared = 0;
            for slot in self.slots.iter() {
                let mut slot = lock(slot);
                let stale = slot
                    .entry
                    .as_ref()
                    .is_some_and(|e| e.is_stale(now, threshold).unwrap_or(true));
                if stale && let Some(client_id) = slot.release() {
                    index.remove(&client_id);
                    cleared += 1;
                }
            }
            cleared
        };
        info!("Cleared {} offline client(s)", cleared);
        self.notifier.notify();
        cleared
    }

    pub fn occupied(&self) -> usize {
        self.read_index().len()
    }

    /// Clients the last evaluation pass marked offline.
    pub fn offline_count(&self) -> usize {
        let _index = self.read_index();
        self.slots
            .iter()
            .filter(|slot| lock(*slot).entry.as_ref().is_some_and(|e| !e.online))
            .count()
    }

    /// Consistent per-row view at a single instant, in slot order.
    pub fn snapshot(&self) -> Snapshot {
        let now = self.now();
        self.snapshot_at(now)
    }

    pub fn snapshot_at(&self, now: u64) -> Snapshot {
        let threshold = self.config.offline_threshold_secs;
        let mut rows = Vec::with_capacity(self.slots.len());
        {
            let _index = self.read_index();
            for slot in self.slots.iter() {
                let slot = lock(slot);
                let Some(entry) = slot.entry.as_ref() else {
                    continue;
                };
                let Some(aggregate) = entry.window.mean() else {
                    continue;
                };
                rows.push(SnapshotRow {
                    client_id: entry.client_id,
                    address: entry.last_address,
                    aggregate,
                    offline: now.saturating_sub(aggregate.last.timestamp) >= threshold,
                });
            }
        }
        Snapshot {
            taken_at: now,
            rows,
        }
    }

    /// Text export; byte-identical to what a render of the same state shows.
    pub fn export_text(&self) -> String {
        self.snapshot().render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], port))
    }

    fn record(id: &str, load: f32, ts: u64) -> TelemetryRecord {
        TelemetryRecord::new(id, load, 40.0, 1200.0, 1000.0, ts)
    }

    fn registry(max_clients: usize, policy: FullPolicy, clock: &ManualClock) -> Registry {
        Registry::with_clock(
            RegistryConfig {
                window_capacity: 2,
                max_clients,
                offline_threshold_secs: 30,
                full_policy: policy,
            },
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn test_lookup_or_create_is_idempotent() {
        let clock = ManualClock::new(1000);
        let registry = registry(4, FullPolicy::Drop, &clock);
        let a = registry.lookup_or_create(ClientId::new("pi-a")).unwrap();
        let b = registry.lookup_or_create(ClientId::new("pi-a")).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.occupied(), 1);
        assert!(registry.aggregate(a).is_none());
    }

    #[test]
    fn test_first_free_slot_is_claimed() {
        let clock = ManualClock::new(1000);
        let registry = registry(3, FullPolicy::Drop, &clock);
        let a = registry.ingest(record("a", 1.0, 1000), addr(1)).unwrap();
        let b = registry.ingest(record("b", 1.0, 1000), addr(1)).unwrap();
        assert_eq!((a.slot(), b.slot()), (0, 1));

        clock.advance(40);
        registry.ingest(record("b", 1.0, 1040), addr(1)).unwrap();
        assert_eq!(registry.clear_offline(), 1);

        let c = registry.ingest(record("c", 1.0, 1040), addr(1)).unwrap();
        assert_eq!(c.slot(), 0);
    }

    #[test]
    fn test_handle_goes_stale_after_clear() {
        let clock = ManualClock::new(1000);
        let registry = registry(2, FullPolicy::Drop, &clock);
        let handle = registry.ingest(record("a", 1.0, 1000), addr(1)).unwrap();
        registry.clear_all();
        registry.ingest(record("b", 2.0, 1000), addr(1)).unwrap();

        assert!(registry.aggregate(handle).is_none());
        assert!(!registry.mark_offline(handle));
    }

    #[test]
    fn test_address_follows_latest_datagram() {
        let clock = ManualClock::new(1000);
        let registry = registry(2, FullPolicy::Drop, &clock);
        registry.ingest(record("a", 1.0, 1000), addr(1)).unwrap();
        let handle = registry.ingest(record("a", 1.0, 1001), addr(2)).unwrap();
        assert_eq!(registry.entry_view(handle).unwrap().last_address, Some(addr(2)));
    }

    #[test]
    fn test_evict_least_recent_policy() {
        let clock = ManualClock::new(1000);
        let registry = registry(2, FullPolicy::EvictLeastRecent, &clock);
        registry.ingest(record("old", 1.0, 900), addr(1)).unwrap();
        registry.ingest(record("new", 1.0, 1000), addr(1)).unwrap();

        let handle = registry.ingest(record("third", 1.0, 1000), addr(1)).unwrap();
        assert_eq!(handle.slot(), 0);
        assert!(registry.find(&ClientId::new("old")).is_none());
        assert!(registry.find(&ClientId::new("new")).is_some());
        assert_eq!(registry.occupied(), 2);
    }

    #[test]
    fn test_mark_transitions_only_on_edges() {
        let clock = ManualClock::new(1000);
        let registry = registry(2, FullPolicy::Drop, &clock);
        let events = registry.subscribe();
        let handle = registry.ingest(record("a", 1.0, 1000), addr(1)).unwrap();

        assert!(!registry.mark_online(handle));
        assert!(registry.mark_offline(handle));
        assert!(!registry.mark_offline(handle));
        assert!(registry.mark_online(handle));

        let received: Vec<bool> = events.try_iter().map(|e| e.offline).collect();
        assert_eq!(received, vec![true, false]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let clock = ManualClock::new(1000);
        let registry = registry(2, FullPolicy::Drop, &clock);
        drop(registry.subscribe());
        let live = registry.subscribe();
        let handle = registry.ingest(record("a", 1.0, 1000), addr(1)).unwrap();
        registry.mark_offline(handle);
        assert_eq!(lock(&registry.subscribers).len(), 1);
        assert!(live.try_recv().unwrap().offline);
    }

    #[test]
    fn test_clear_offline_frees_slots_without_samples() {
        let clock = ManualClock::new(1000);
        let registry = registry(2, FullPolicy::Drop, &clock);
        registry.lookup_or_create(ClientId::new("a")).unwrap();
        registry.lookup_or_create(ClientId::new("b")).unwrap();
        assert!(registry.ingest(record("c", 1.0, 1000), addr(1)).is_err());
        assert!(registry.snapshot().is_empty());

        assert_eq!(registry.clear_offline(), 2);
        assert_eq!(registry.occupied(), 0);
        assert!(registry.ingest(record("c", 1.0, 1000), addr(1)).is_ok());
    }

    #[test]
    fn test_future_timestamps_count_as_fresh() {
        let clock = ManualClock::new(1000);
        let registry = registry(2, FullPolicy::Drop, &clock);
        registry.ingest(record("a", 1.0, 5000), addr(1)).unwrap();
        let summary = registry.evaluate(clock.now_secs());
        assert_eq!(summary.online, 1);
        assert!(summary.transitions.is_empty());
    }
}
