//! Generic resource table
//!
//! One table per object kind. The table owns the slot bookkeeping; the
//! caller owns what goes in a slot and how the backing host primitive is
//! built and torn down (the `ctor`/`dtor` closures).

use crate::error::{CreateError, DeleteError, TableError};
use core_types::{ObjectId, ObjectKind};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A populated slot
///
/// Records are immutable once published; mutable per-object state lives
/// behind the payload's own synchronization.
pub struct Record<T> {
    id: ObjectId,
    name: Option<String>,
    display_name: String,
    creator: ObjectId,
    payload: T,
}

impl<T> Record<T> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Name the object was created with, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Host-facing name: truncated and suffixed to be unique on the host
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Task that created the object; [`ObjectId::UNDEFINED`] outside any task
    pub fn creator(&self) -> ObjectId {
        self.creator
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }
}

impl<T> fmt::Debug for Record<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("creator", &self.creator)
            .finish_non_exhaustive()
    }
}

enum SlotState<T> {
    Free,
    /// Reserved by an in-flight create; invisible to lookups
    Reserved { name: Option<String> },
    Valid(Arc<Record<T>>),
    /// In-flight delete; invisible to lookups, cannot be deleted again
    Releasing(Arc<Record<T>>),
}

struct Slot<T> {
    generation: u16,
    state: SlotState<T>,
}

impl<T> Slot<T> {
    fn reserved_or_live_name(&self) -> Option<&str> {
        match &self.state {
            SlotState::Free => None,
            SlotState::Reserved { name } => name.as_deref(),
            SlotState::Valid(record) | SlotState::Releasing(record) => record.name(),
        }
    }
}

struct TableInner<T> {
    slots: Vec<Slot<T>>,
    free: BTreeSet<usize>,
}

impl<T> TableInner<T> {
    /// Returns the slot to the free list and retires its generation
    fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = SlotState::Free;
            slot.generation = ObjectId::next_generation(slot.generation);
            self.free.insert(index);
        }
    }
}

/// Fixed-capacity table of named objects of one kind
///
/// # Slot lifecycle
///
/// ```text
/// Free --create--> Reserved --ctor ok--> Valid --delete--> Releasing --dtor ok--> Free
///                     |                                        |
///                     +--ctor err--> Free          dtor err <--+--> Valid
/// ```
///
/// Only `Valid` slots are visible to lookups. Each return to `Free` bumps
/// the slot's generation, so every handle issued for the previous occupant
/// is rejected from then on while the slot itself is reused right away.
pub struct ResourceTable<T> {
    kind: ObjectKind,
    capacity: usize,
    name_limit: usize,
    host_name_len: usize,
    sequence: AtomicU32,
    inner: Mutex<TableInner<T>>,
}

impl<T> ResourceTable<T> {
    /// Largest capacity a 16-bit slot index can address
    pub const MAX_CAPACITY: usize = ObjectId::MAX_INDEX as usize;

    /// Creates an empty table
    ///
    /// Names must be strictly shorter than `name_limit` bytes. Display
    /// names are at most `host_name_len` bytes. Capacity is clamped to
    /// [`Self::MAX_CAPACITY`].
    pub fn new(kind: ObjectKind, capacity: usize, name_limit: usize, host_name_len: usize) -> Self {
        let capacity = capacity.min(Self::MAX_CAPACITY);
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 1,
                state: SlotState::Free,
            })
            .collect();
        Self {
            kind,
            capacity,
            name_limit,
            host_name_len,
            sequence: AtomicU32::new(0),
            inner: Mutex::new(TableInner {
                slots,
                free: (0..capacity).collect(),
            }),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rejects names that are not strictly shorter than the limit
    pub fn validate_name(&self, name: &str) -> Result<(), TableError> {
        if name.len() >= self.name_limit {
            return Err(TableError::NameTooLong {
                len: name.len(),
                limit: self.name_limit,
            });
        }
        Ok(())
    }

    /// Allocates a slot and builds its payload
    ///
    /// 1. Validate the name (no lock taken).
    /// 2. Under the lock: fail with `NoFreeIds` if no slot is free, then
    ///    with `NameTaken` if a live or reserved slot has the same name,
    ///    otherwise reserve the lowest free index.
    /// 3. Without the lock: run `ctor` with the new handle and display name.
    /// 4. Publish the record, or release the slot if `ctor` failed.
    pub fn create<E, F>(
        &self,
        name: Option<&str>,
        creator: ObjectId,
        ctor: F,
    ) -> Result<ObjectId, CreateError<E>>
    where
        F: FnOnce(ObjectId, &str) -> Result<T, E>,
    {
        if let Some(name) = name {
            self.validate_name(name)?;
        }

        let (index, id) = {
            let mut inner = self.lock();
            let index = *inner.free.iter().next().ok_or(TableError::NoFreeIds)?;
            if let Some(name) = name {
                if inner
                    .slots
                    .iter()
                    .any(|slot| slot.reserved_or_live_name() == Some(name))
                {
                    return Err(TableError::NameTaken.into());
                }
            }
            inner.free.remove(&index);
            let slot = &mut inner.slots[index];
            slot.state = SlotState::Reserved {
                name: name.map(str::to_string),
            };
            (index, ObjectId::new(self.kind, slot.generation, index as u16))
        };

        let reservation = Reservation {
            table: self,
            index,
            armed: true,
        };
        let display_name = self.display_name_for(name);
        let payload = ctor(id, &display_name).map_err(CreateError::Constructor)?;

        let record = Arc::new(Record {
            id,
            name: name.map(str::to_string),
            display_name,
            creator,
            payload,
        });
        let mut inner = self.lock();
        inner.slots[index].state = SlotState::Valid(record);
        drop(inner);
        reservation.disarm();
        Ok(id)
    }

    /// Releases a slot after tearing down its payload
    ///
    /// The record is hidden from lookups while `dtor` runs. If `dtor`
    /// fails the record is restored unchanged and the handle stays valid.
    pub fn delete<E, F>(&self, id: ObjectId, dtor: F) -> Result<Arc<Record<T>>, DeleteError<E>>
    where
        F: FnOnce(&Record<T>) -> Result<(), E>,
    {
        let record = {
            let mut inner = self.lock();
            let index = self.checked_index(&inner, id)?;
            let slot = &mut inner.slots[index];
            let record = match &slot.state {
                SlotState::Valid(record) => Arc::clone(record),
                _ => return Err(TableError::InvalidId.into()),
            };
            slot.state = SlotState::Releasing(Arc::clone(&record));
            record
        };

        match dtor(&record) {
            Ok(()) => {
                self.lock().release(id.index());
                Ok(record)
            }
            Err(err) => {
                let mut inner = self.lock();
                inner.slots[id.index()].state = SlotState::Valid(Arc::clone(&record));
                Err(DeleteError::Destructor(err))
            }
        }
    }

    /// Resolves a handle to its record
    ///
    /// Wrong-kind, out-of-range, stale and not-yet-populated handles are
    /// all `InvalidId`.
    pub fn lookup(&self, id: ObjectId) -> Result<Arc<Record<T>>, TableError> {
        let inner = self.lock();
        let index = self.checked_index(&inner, id)?;
        match &inner.slots[index].state {
            SlotState::Valid(record) => Ok(Arc::clone(record)),
            _ => Err(TableError::InvalidId),
        }
    }

    /// Finds a live object by exact name
    pub fn find_by_name(&self, name: &str) -> Result<ObjectId, TableError> {
        self.validate_name(name)?;
        let inner = self.lock();
        inner
            .slots
            .iter()
            .find_map(|slot| match &slot.state {
                SlotState::Valid(record) if record.name() == Some(name) => Some(record.id()),
                _ => None,
            })
            .ok_or(TableError::NameNotFound)
    }

    /// Returns the first live record matching `predicate`
    pub fn find<P>(&self, mut predicate: P) -> Option<Arc<Record<T>>>
    where
        P: FnMut(&Record<T>) -> bool,
    {
        let inner = self.lock();
        inner.slots.iter().find_map(|slot| match &slot.state {
            SlotState::Valid(record) if predicate(record) => Some(Arc::clone(record)),
            _ => None,
        })
    }

    /// Handle of the live object in slot `index`, if any
    pub fn id_at(&self, index: usize) -> Option<ObjectId> {
        let inner = self.lock();
        match &inner.slots.get(index)?.state {
            SlotState::Valid(record) => Some(record.id()),
            _ => None,
        }
    }

    /// Handles of every live object, in slot order
    pub fn ids(&self) -> Vec<ObjectId> {
        self.records().iter().map(|r| r.id()).collect()
    }

    /// Every live record, in slot order
    pub fn records(&self) -> Vec<Arc<Record<T>>> {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .filter_map(|slot| match &slot.state {
                SlotState::Valid(record) => Some(Arc::clone(record)),
                _ => None,
            })
            .collect()
    }

    /// Slots that are not free (live, reserved or being released)
    pub fn active_count(&self) -> usize {
        self.capacity - self.lock().free.len()
    }

    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    fn checked_index(&self, inner: &TableInner<T>, id: ObjectId) -> Result<usize, TableError> {
        if id.kind() != Some(self.kind) {
            return Err(TableError::InvalidId);
        }
        let index = id.index();
        match inner.slots.get(index) {
            Some(slot) if slot.generation == id.generation() => Ok(index),
            _ => Err(TableError::InvalidId),
        }
    }

    /// Builds a host name of at most `host_name_len` bytes
    ///
    /// The suffix is a per-table sequence number, so two names that
    /// truncate to the same prefix still get distinct host names. When the
    /// sequence outgrows the room, only its low digits are kept.
    fn display_name_for(&self, name: Option<&str>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let digits = seq.to_string();
        let keep = self.host_name_len.saturating_sub(1);
        let mut suffix = format!("-{}", &digits[digits.len().saturating_sub(keep)..]);
        suffix.truncate(self.host_name_len);
        let base = name.unwrap_or(self.kind.label());
        let room = self.host_name_len.saturating_sub(suffix.len());
        let mut cut = base.len().min(room);
        while !base.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}{}", &base[..cut], suffix)
    }

    fn lock(&self) -> MutexGuard<'_, TableInner<T>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> fmt::Debug for ResourceTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTable")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("free", &self.free_count())
            .finish()
    }
}

/// Frees a reserved slot unless the create completes
///
/// Also covers a constructor that panics.
struct Reservation<'a, T> {
    table: &'a ResourceTable<T>,
    index: usize,
    armed: bool,
}

impl<T> Reservation<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.table.lock().release(self.index);
        }
    }
}
