use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use foldhash::fast::RandomState;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::{Diagnostics, Lease, Shape, Slot};

const DEFAULT_IDLE_LIMIT: usize = 1024;

/// Settings the recycler is built from.
#[derive(Debug)]
pub(crate) struct RecyclerConfig {
    pub(crate) idle_limit: usize,
    pub(crate) diagnostics: Diagnostics,
}

impl Default for RecyclerConfig {
    fn default() -> Self {
        Self {
            idle_limit: DEFAULT_IDLE_LIMIT,
            diagnostics: Diagnostics::default(),
        }
    }
}

/// Hands out reset state objects of any shape and takes them back for reuse.
///
/// Each shape has its own shelf (free list), as shapes differ in layout. Shelves are created
/// on first use. After that, finding a shelf only takes a shared read lock, so acquisitions
/// only contend on the idle list of their own shape.
pub(crate) struct Recycler {
    shelves: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>, RandomState>>,
    idle_limit: usize,
    diagnostics: Arc<Diagnostics>,
    counters: Arc<Counters>,
}

impl Recycler {
    pub(crate) fn new(config: RecyclerConfig) -> Self {
        Self {
            shelves: RwLock::new(HashMap::default()),
            idle_limit: config.idle_limit,
            diagnostics: Arc::new(config.diagnostics),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Returns a pending state object of shape `S` holding one logical reference.
    ///
    /// Never fails: an empty shelf falls back to allocation.
    pub(crate) fn acquire<S: Shape>(&self) -> Lease<Slot<S>> {
        self.shelf::<S>().acquire()
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            recycled: self.counters.recycled.load(Ordering::Relaxed),
        }
    }

    fn shelf<S: Shape>(&self) -> Arc<Shelf<S>> {
        let existing = self.shelves.read().get(&TypeId::of::<S>()).map(Arc::clone);

        existing
            .unwrap_or_else(|| self.register_shelf::<S>())
            .downcast::<Shelf<S>>()
            .expect("shelves are registered under the TypeId of their shape")
    }

    #[cold]
    fn register_shelf<S: Shape>(&self) -> Arc<dyn Any + Send + Sync> {
        let mut shelves = self.shelves.write();

        // Another thread may have registered it since we looked.
        let shelf = shelves.entry(TypeId::of::<S>()).or_insert_with(|| {
            trace!(shape = type_name::<S>(), "registered shelf for new shape");

            let shelf: Arc<dyn Any + Send + Sync> = Arc::new(Shelf::<S> {
                idle: Mutex::new(Vec::new()),
                idle_limit: self.idle_limit,
                diagnostics: Arc::clone(&self.diagnostics),
                counters: Arc::clone(&self.counters),
            });

            shelf
        });

        Arc::clone(shelf)
    }
}

impl fmt::Debug for Recycler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("shapes", &self.shelves.read().len())
            .field("idle_limit", &self.idle_limit)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Free list of idle slots of one shape.
pub(crate) struct Shelf<S> {
    idle: Mutex<Vec<Arc<Slot<S>>>>,
    idle_limit: usize,
    diagnostics: Arc<Diagnostics>,
    counters: Arc<Counters>,
}

impl<S: Shape> Shelf<S> {
    fn acquire(self: &Arc<Self>) -> Lease<Slot<S>> {
        let recycled = self.idle.lock().pop();

        let slot = if let Some(slot) = recycled {
            slot.reissue();
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            trace!(shape = type_name::<S>(), "reissued idle state object");
            slot
        } else {
            self.counters.allocated.fetch_add(1, Ordering::Relaxed);
            trace!(shape = type_name::<S>(), "allocated new state object");
            Arc::new(Slot::new(Arc::downgrade(self), Arc::clone(&self.diagnostics)))
        };

        // SAFETY: A new slot starts with one logical reference and a reissued slot was just
        // given one. Nobody else has seen it yet, so we can hand that reference out.
        unsafe { Lease::adopt(slot) }
    }

    /// Takes back a slot that has been reset. Beyond the idle limit the slot is freed instead.
    pub(crate) fn put_back(&self, slot: Arc<Slot<S>>) {
        self.counters.recycled.fetch_add(1, Ordering::Relaxed);

        let mut idle = self.idle.lock();

        if idle.len() < self.idle_limit {
            idle.push(slot);
        }
    }
}

impl<S> fmt::Debug for Shelf<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("idle", &self.idle.lock().len())
            .field("idle_limit", &self.idle_limit)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Counters {
    allocated: AtomicU64,
    reused: AtomicU64,
    recycled: AtomicU64,
}

/// Allocation and reuse counters of a [`PromisePool`][crate::PromisePool].
///
/// Counts cover every state object shape the pool has handed out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolStats {
    /// State objects created by allocating fresh memory.
    pub allocated: u64,

    /// State objects handed out again after being recycled.
    pub reused: u64,

    /// State objects returned to the pool after their operation ended.
    pub recycled: u64,
}
