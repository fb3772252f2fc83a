//! Reference-counted pool of playback handles.
//!
//! Entries live in a map guarded by a read-write lock; owner counts and
//! access times are per-entry atomics, so reusing a warm handle only takes the
//! read lock. A new key is published as a pending entry whose slot stays
//! locked while the factory runs, so the map lock is never held across
//! handle creation. Concurrent acquirers of the same key wait on that slot
//! and share the one handle it produces.
//!
//! Handles are destroyed outside the map lock, exactly once, after their last
//! position has been saved to the [`ResumeCache`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};

use crate::error::{PoolError, Result};
use crate::resume::ResumeCache;

/// An expensive playback resource.
pub trait PlaybackHandle: Send + Sync {
    /// Current offset to resume from after destruction, if meaningful.
    fn position(&self) -> Option<Duration>;

    /// Release the underlying resource. Called exactly once.
    fn shutdown(&self);
}

/// Creates handles for keys on demand.
pub trait HandleFactory: Send + Sync {
    type Handle: PlaybackHandle;

    /// Create a handle for `key`, starting at `resume_from` when given.
    fn create(&self, key: &str, resume_from: Option<Duration>) -> Result<Self::Handle>;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Soft limit on live entries. Exceeded only when every entry is owned.
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { capacity: 3 }
    }
}

enum Slot<H> {
    Pending,
    Ready(Arc<H>),
    Failed(PoolError),
}

struct PoolEntry<H> {
    slot: Mutex<Slot<H>>,
    owners: AtomicUsize,
    last_access: AtomicU64,
    destroyed: AtomicBool,
}

impl<H> PoolEntry<H> {
    fn pending(tick: u64) -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            owners: AtomicUsize::new(1),
            last_access: AtomicU64::new(tick),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Take ownership. Callers hold the map lock so eviction cannot interleave.
    fn adopt(&self, tick: u64) {
        self.owners.fetch_add(1, Ordering::SeqCst);
        self.last_access.fetch_max(tick, Ordering::SeqCst);
    }

    /// Saturating decrement. Returns the remaining count.
    fn disown(&self) -> usize {
        let previous = self
            .owners
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Wait for the handle, blocking only while this entry is being created.
    fn ready(&self, key: &str) -> Result<Arc<H>> {
        match &*self.slot.lock() {
            Slot::Ready(handle) => Ok(Arc::clone(handle)),
            Slot::Failed(err) => Err(err.clone()),
            Slot::Pending => Err(PoolError::Create {
                key: key.to_string(),
                reason: "creation abandoned".to_string(),
            }),
        }
    }
}

/// Capacity-bounded pool keyed by resource identifier.
pub struct ResourcePool<F: HandleFactory> {
    factory: F,
    config: PoolConfig,
    entries: RwLock<HashMap<String, Arc<PoolEntry<F::Handle>>>>,
    clock: AtomicU64,
    resume: ResumeCache,
}

impl<F: HandleFactory> ResourcePool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self::with_resume_cache(factory, config, ResumeCache::default())
    }

    pub fn with_resume_cache(factory: F, config: PoolConfig, resume: ResumeCache) -> Self {
        Self {
            factory,
            config,
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            resume,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the handle for `key`, creating it if needed, and take ownership.
    ///
    /// At capacity, the least-recently-accessed unowned entry is evicted. If
    /// every entry is owned the pool grows past capacity instead. A failed
    /// create evicts nothing.
    pub fn acquire(&self, key: &str) -> Result<Arc<F::Handle>> {
        let tick = self.tick();

        let existing = self.entries.read().get(key).map(|entry| {
            entry.adopt(tick);
            Arc::clone(entry)
        });
        if let Some(entry) = existing {
            return Self::join(key, &entry);
        }

        let entry: Arc<PoolEntry<F::Handle>> = Arc::new(PoolEntry::pending(tick));
        let mut slot = entry.slot.lock();
        {
            let mut entries = self.entries.write();
            if let Some(existing) = entries.get(key) {
                existing.adopt(tick);
                let existing = Arc::clone(existing);
                drop(entries);
                drop(slot);
                return Self::join(key, &existing);
            }
            entries.insert(key.to_string(), Arc::clone(&entry));
        }

        let resume_from = self.resume.get(key);
        match self.factory.create(key, resume_from) {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *slot = Slot::Ready(Arc::clone(&handle));
                drop(slot);

                if resume_from.is_some() {
                    self.resume.forget(key);
                }
                counter!("playback_pool_created_total").increment(1);
                self.evict_for(key);
                Ok(handle)
            }
            Err(err) => {
                *slot = Slot::Failed(err.clone());
                drop(slot);
                entry.destroyed.store(true, Ordering::SeqCst);

                let mut entries = self.entries.write();
                if entries.get(key).is_some_and(|e| Arc::ptr_eq(e, &entry)) {
                    entries.remove(key);
                }
                gauge!("playback_pool_entries").set(entries.len() as f64);
                tracing::warn!("Failed to create playback handle for {}: {}", key, err);
                Err(err)
            }
        }
    }

    fn join(key: &str, entry: &PoolEntry<F::Handle>) -> Result<Arc<F::Handle>> {
        entry.ready(key).inspect_err(|_| {
            entry.disown();
        })
    }

    /// Evict one unowned entry if `key`'s insertion pushed the pool past capacity.
    fn evict_for(&self, key: &str) {
        let (victim_key, victim) = {
            let mut entries = self.entries.write();
            gauge!("playback_pool_entries").set(entries.len() as f64);
            if entries.len() <= self.config.capacity {
                return;
            }

            let victim = entries
                .iter()
                .filter(|(k, e)| k.as_str() != key && e.owners.load(Ordering::SeqCst) == 0)
                .min_by_key(|(_, e)| e.last_access.load(Ordering::SeqCst))
                .map(|(k, _)| k.clone());
            match victim.and_then(|k| entries.remove_entry(&k)) {
                Some(evicted) => {
                    gauge!("playback_pool_entries").set(entries.len() as f64);
                    evicted
                }
                None => {
                    counter!("playback_pool_over_capacity_total").increment(1);
                    tracing::warn!(
                        "Playback pool over capacity ({} entries, all owned) after adding {}",
                        entries.len(),
                        key
                    );
                    return;
                }
            }
        };

        counter!("playback_pool_evictions_total").increment(1);
        tracing::debug!("Evicting {} for {}", victim_key, key);
        self.destroy(&victim_key, &victim, "evicted");
    }

    /// Give up ownership but keep the handle warm for a later acquire.
    ///
    /// Returns the remaining owner count, or `None` if the key is not pooled.
    pub fn detach(&self, key: &str) -> Option<usize> {
        self.entries.read().get(key).map(|entry| entry.disown())
    }

    /// Give up ownership; destroy the handle once nobody owns it.
    ///
    /// Returns true if this call destroyed the handle.
    pub fn release(&self, key: &str) -> bool {
        let entry = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get(key) else {
                return false;
            };
            if entry.disown() > 0 {
                return false;
            }
            let entry = entries.remove(key);
            gauge!("playback_pool_entries").set(entries.len() as f64);
            entry
        };

        entry.is_some_and(|entry| self.destroy(key, &entry, "released"))
    }

    /// Destroy the handle regardless of owners.
    ///
    /// Returns true if a handle was destroyed.
    pub fn force_release(&self, key: &str) -> bool {
        let entry = {
            let mut entries = self.entries.write();
            let entry = entries.remove(key);
            gauge!("playback_pool_entries").set(entries.len() as f64);
            entry
        };

        match entry {
            Some(entry) => {
                let owners = entry.owners.load(Ordering::SeqCst);
                if owners > 0 {
                    tracing::debug!("Force-releasing {} with {} owners", key, owners);
                }
                self.destroy(key, &entry, "forced")
            }
            None => false,
        }
    }

    /// Force-release every entry. Returns how many handles were destroyed.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.entries.write().drain().collect();
        gauge!("playback_pool_entries").set(0.0);
        drained
            .iter()
            .filter(|(key, entry)| self.destroy(key, entry, "forced"))
            .count()
    }

    /// Must be called without the map lock; waits out a pending create.
    fn destroy(&self, key: &str, entry: &PoolEntry<F::Handle>, reason: &'static str) -> bool {
        if entry.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let slot = entry.slot.lock();
        let Slot::Ready(handle) = &*slot else {
            return false;
        };
        if let Some(position) = handle.position() {
            self.resume.save(key, position);
        }
        handle.shutdown();
        counter!("playback_pool_destroyed_total", "reason" => reason).increment(1);
        true
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn owners(&self, key: &str) -> Option<usize> {
        self.entries
            .read()
            .get(key)
            .map(|entry| entry.owners.load(Ordering::SeqCst))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Saved position a new handle for `key` would resume from.
    pub fn resume_position(&self, key: &str) -> Option<Duration> {
        self.resume.get(key)
    }
}
