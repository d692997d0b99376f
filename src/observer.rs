use crate::debug;
use crate::encoder;
use crate::error::{Result, ShareError};
use crate::instance::{SharedInstance, Value, WeakInstance};
use crate::protocol::{DebugUpdate, FieldIndex, UpdateOfShared};
use crate::scheduler::TickQueue;
use ahash::AHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

pub type Callback = Box<dyn FnMut(&UpdateOfShared, &DebugUpdate) -> Result<()>>;

static OBSERVER_IDS: AtomicU64 = AtomicU64::new(1);

/// Writes one instance accumulated since the last flush, sparse by field.
pub struct PendingInstance {
    pub instance: SharedInstance,
    pub values: Vec<Option<Value>>,
}

impl PendingInstance {
    pub fn dirty_fields(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (i, v)))
    }
}

/// Per-observer accumulator. Instances keep first-dirtied order and each
/// `(instance, field)` keeps only the last value written.
#[derive(Default)]
pub struct PendingChangeSet {
    instances: Vec<PendingInstance>,
    positions: AHashMap<usize, usize>,
}

impl PendingChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, instance: &SharedInstance, field: FieldIndex, value: Value) {
        let position = match self.positions.get(&instance.key()) {
            Some(&position) => position,
            None => {
                self.instances.push(PendingInstance {
                    instance: instance.clone(),
                    values: vec![None; instance.field_count()],
                });
                let position = self.instances.len() - 1;
                self.positions.insert(instance.key(), position);
                position
            }
        };

        let values = &mut self.instances[position].values;
        let slot = field as usize;
        if slot >= values.len() {
            values.resize(slot + 1, None);
        }
        values[slot] = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn field_count(&self) -> usize {
        self.instances
            .iter()
            .map(|p| p.values.iter().filter(|v| v.is_some()).count())
            .sum()
    }

    pub fn contains(&self, instance: &SharedInstance) -> bool {
        self.positions.contains_key(&instance.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingInstance> {
        self.instances.iter()
    }
}

struct ObserverInner {
    id: u64,
    callback: RefCell<Callback>,
    pending: RefCell<PendingChangeSet>,
    waiting_commit: Cell<bool>,
    roots: RefCell<Vec<WeakInstance>>,
    queue: Weak<TickQueue>,
}

/// A subscriber receiving batched flushes of the instances it is shared on.
#[derive(Clone)]
pub struct Observer(Rc<ObserverInner>);

impl Observer {
    pub(crate) fn new(queue: Weak<TickQueue>, callback: Callback) -> Self {
        Self(Rc::new(ObserverInner {
            id: OBSERVER_IDS.fetch_add(1, Ordering::Relaxed),
            callback: RefCell::new(callback),
            pending: RefCell::new(PendingChangeSet::new()),
            waiting_commit: Cell::new(false),
            roots: RefCell::new(Vec::new()),
            queue,
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_waiting_commit(&self) -> bool {
        self.0.waiting_commit.get()
    }

    pub fn pending_instances(&self) -> usize {
        self.0.pending.borrow().len()
    }

    pub fn pending_fields(&self) -> usize {
        self.0.pending.borrow().field_count()
    }

    pub(crate) fn add_root(&self, root: &SharedInstance) {
        let mut roots = self.0.roots.borrow_mut();
        if !roots.iter().any(|r| r.is(root)) {
            roots.push(root.downgrade());
        }
    }

    pub(crate) fn remove_root(&self, root: &SharedInstance) {
        self.0.roots.borrow_mut().retain(|r| !r.is(root));
    }

    /// Live roots; dropped ones are pruned.
    pub(crate) fn roots(&self) -> Vec<SharedInstance> {
        let mut roots = self.0.roots.borrow_mut();
        roots.retain(|r| r.upgrade().is_some());
        roots.iter().filter_map(WeakInstance::upgrade).collect()
    }

    pub(crate) fn record(&self, instance: &SharedInstance, field: FieldIndex, value: Value) {
        self.0.pending.borrow_mut().record(instance, field, value);
        trace!(observer = self.0.id, instance = ?instance.identity(), field, "recorded write");

        if !self.0.waiting_commit.replace(true) {
            match self.0.queue.upgrade() {
                Some(queue) => queue.enqueue(self.clone()),
                None => warn!(observer = self.0.id, "scheduler dropped, commit must be called manually"),
            }
        }
    }

    /// Drains the pending changes into both encodings and hands them to the
    /// callback. The pending set is empty afterwards whatever the outcome.
    /// Returns false when there was nothing to deliver.
    pub fn commit(&self) -> Result<bool> {
        let mut callback = self
            .0
            .callback
            .try_borrow_mut()
            .map_err(|_| ShareError::CommitInProgress)?;

        let changes = std::mem::take(&mut *self.0.pending.borrow_mut());
        self.0.waiting_commit.set(false);

        if changes.is_empty() {
            return Ok(false);
        }

        let (compact, debug_update) = encoder::encode_changes(&changes)?;
        drop(changes);

        debug::trace_flush(self.0.id, &compact);
        debug::log_update("Flush", &compact, &debug_update);

        (&mut *callback)(&compact, &debug_update)?;
        Ok(true)
    }
}

impl PartialEq for Observer {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.0.id)
            .field("waiting_commit", &self.0.waiting_commit.get())
            .finish()
    }
}
