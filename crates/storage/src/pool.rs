//! Shared arena of published columns with an explicit reference-count
//! table.
//!
//! Columns are built exclusively owned, then published into the pool. After
//! publication they are read-shared through cheap pins; mutation goes
//! through [`ColumnPool::update`], which refuses columns that are currently
//! shared, enforcing the single-writer discipline without per-column locks.
//! The pool lock guards only the slot table; data reads never hold it.

use std::sync::{Arc, Mutex};

use basalt_common::error::{BasaltError, Result};
use basalt_common::ids::ColumnId;
use basalt_common::types::ElemType;

use crate::column::Column;

struct Slot {
    column: Option<Arc<Column>>,
    refs: usize,
}

#[derive(Default)]
struct PoolInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Arena of published columns indexed by stable [`ColumnId`].
#[derive(Default)]
pub struct ColumnPool {
    inner: Mutex<PoolInner>,
}

impl std::fmt::Debug for ColumnPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnPool")
            .field("live", &self.live())
            .finish()
    }
}

impl ColumnPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish an exclusively owned column, returning the owning handle
    /// (reference count 1).
    pub fn publish(self: &Arc<Self>, column: Column) -> ColumnHandle {
        let elem = column.elem_type();
        let mut inner = self.inner.lock().expect("column pool lock poisoned");
        let slot = Slot {
            column: Some(Arc::new(column)),
            refs: 1,
        };
        let id = match inner.free.pop() {
            Some(idx) => {
                inner.slots[idx as usize] = slot;
                ColumnId(idx)
            }
            None => {
                inner.slots.push(slot);
                ColumnId((inner.slots.len() - 1) as u32)
            }
        };
        ColumnHandle {
            pool: Arc::clone(self),
            id,
            elem,
        }
    }

    /// Increment the reference count of a live column.
    pub fn retain(&self, id: ColumnId) -> Result<()> {
        let mut inner = self.inner.lock().expect("column pool lock poisoned");
        match inner.slots.get_mut(id.index()) {
            Some(slot) if slot.column.is_some() => {
                slot.refs += 1;
                Ok(())
            }
            _ => Err(BasaltError::Execution(format!(
                "retain of dead column {id}"
            ))),
        }
    }

    /// Decrement the reference count; the column and its heaps are dropped
    /// when the count reaches zero.
    ///
    /// Releasing an unknown or already-dead id is a no-op; error paths may
    /// release the same id more than once.
    pub fn release(&self, id: ColumnId) {
        let mut inner = self.inner.lock().expect("column pool lock poisoned");
        let Some(slot) = inner.slots.get_mut(id.index()) else {
            return;
        };
        if slot.column.is_none() {
            return;
        }
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            // Heap release happens on the last Arc drop; transient pins may
            // extend the data lifetime briefly but never the slot's.
            slot.column = None;
            inner.free.push(id.0);
        }
    }

    /// Cheap shared read access. The returned pin keeps the data alive even
    /// if every handle is released while it is held.
    pub fn pin(&self, id: ColumnId) -> Result<Arc<Column>> {
        let inner = self.inner.lock().expect("column pool lock poisoned");
        inner
            .slots
            .get(id.index())
            .and_then(|slot| slot.column.clone())
            .ok_or_else(|| BasaltError::Execution(format!("pin of dead column {id}")))
    }

    /// Mutate a column under the single-writer discipline.
    ///
    /// Refuses when the column is shared (more than one handle, or an
    /// outstanding pin). The pool lock covers only the slot handoff; the
    /// mutation itself runs unlocked, so one writer never stalls readers of
    /// other columns.
    pub fn update<T>(&self, id: ColumnId, f: impl FnOnce(&mut Column) -> Result<T>) -> Result<T> {
        let mut arc = {
            let mut inner = self.inner.lock().expect("column pool lock poisoned");
            let slot = inner
                .slots
                .get_mut(id.index())
                .filter(|slot| slot.column.is_some())
                .ok_or_else(|| BasaltError::Execution(format!("update of dead column {id}")))?;
            if slot.refs > 1 {
                return Err(BasaltError::Execution(format!(
                    "update of column {id} shared by {} handles",
                    slot.refs
                )));
            }
            slot.column.take().expect("live slot")
        };
        let out = match Arc::get_mut(&mut arc) {
            Some(column) => f(column),
            None => Err(BasaltError::Execution(format!(
                "update of column {id} with outstanding pins"
            ))),
        };
        let mut inner = self.inner.lock().expect("column pool lock poisoned");
        inner.slots[id.index()].column = Some(arc);
        out
    }

    /// Reference count of a live column (0 when dead). Intended for tests
    /// and leak diagnostics.
    #[must_use]
    pub fn refs(&self, id: ColumnId) -> usize {
        let inner = self.inner.lock().expect("column pool lock poisoned");
        inner
            .slots
            .get(id.index())
            .filter(|slot| slot.column.is_some())
            .map(|slot| slot.refs)
            .unwrap_or(0)
    }

    /// Number of live columns in the arena.
    #[must_use]
    pub fn live(&self) -> usize {
        let inner = self.inner.lock().expect("column pool lock poisoned");
        inner.slots.iter().filter(|s| s.column.is_some()).count()
    }
}

/// Owning handle to a published column.
///
/// `Clone` retains, `Drop` releases: double-release is unrepresentable for
/// handle users, while the raw [`ColumnPool::retain`] / [`ColumnPool::release`]
/// pair stays available to tests and registration seams.
pub struct ColumnHandle {
    pool: Arc<ColumnPool>,
    id: ColumnId,
    elem: ElemType,
}

impl ColumnHandle {
    /// Arena id of the column.
    #[must_use]
    pub fn id(&self) -> ColumnId {
        self.id
    }

    /// Element type recorded at publication.
    #[must_use]
    pub fn elem_type(&self) -> ElemType {
        self.elem
    }

    /// Pin the column data for reading.
    pub fn pin(&self) -> Result<Arc<Column>> {
        self.pool.pin(self.id)
    }

    /// Mutate through the single-writer discipline.
    pub fn update<T>(&self, f: impl FnOnce(&mut Column) -> Result<T>) -> Result<T> {
        self.pool.update(self.id, f)
    }

    /// The pool this handle belongs to.
    #[must_use]
    pub fn pool(&self) -> &Arc<ColumnPool> {
        &self.pool
    }
}

impl Clone for ColumnHandle {
    fn clone(&self) -> Self {
        // A clone of a live handle always targets a live slot.
        self.pool.retain(self.id).expect("clone of dead handle");
        Self {
            pool: Arc::clone(&self.pool),
            id: self.id,
            elem: self.elem,
        }
    }
}

impl Drop for ColumnHandle {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

impl std::fmt::Debug for ColumnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnHandle")
            .field("id", &self.id)
            .field("elem", &self.elem)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_common::memory::MemoryAccountant;
    use basalt_common::types::Scalar;

    fn column(acct: &Arc<MemoryAccountant>, values: &[i64]) -> Column {
        let mut col = Column::new(acct, ElemType::Lng, values.len().max(1)).unwrap();
        for v in values {
            col.append(&Scalar::Lng(*v)).unwrap();
        }
        col
    }

    #[test]
    fn retain_release_balance_frees_exactly_once() {
        let acct = Arc::new(MemoryAccountant::unbounded());
        let pool = ColumnPool::new();
        let handle = pool.publish(column(&acct, &[1, 2, 3]));
        let id = handle.id();

        pool.retain(id).unwrap();
        pool.retain(id).unwrap();
        assert_eq!(pool.refs(id), 3);
        pool.release(id);
        pool.release(id);
        assert_eq!(pool.refs(id), 1);
        assert_eq!(pool.live(), 1);
        drop(handle);
        assert_eq!(pool.live(), 0);
        assert_eq!(acct.committed_bytes(), 0);
        // Further releases of the dead id are no-ops.
        pool.release(id);
        assert_eq!(acct.committed_bytes(), 0);
    }

    #[test]
    fn handle_clone_is_a_retain() {
        let acct = Arc::new(MemoryAccountant::unbounded());
        let pool = ColumnPool::new();
        let a = pool.publish(column(&acct, &[9]));
        let b = a.clone();
        assert_eq!(pool.refs(a.id()), 2);
        drop(a);
        assert_eq!(pool.refs(b.id()), 1);
        assert_eq!(b.pin().unwrap().count(), 1);
    }

    #[test]
    fn pin_outlives_release() {
        let acct = Arc::new(MemoryAccountant::unbounded());
        let pool = ColumnPool::new();
        let handle = pool.publish(column(&acct, &[5, 6]));
        let pinned = handle.pin().unwrap();
        drop(handle);
        assert_eq!(pool.live(), 0);
        // Data stays readable through the pin, heaps are freed when the
        // pin drops.
        assert_eq!(pinned.fixed_slice::<i64>().unwrap(), &[5, 6]);
        assert!(acct.committed_bytes() > 0);
        drop(pinned);
        assert_eq!(acct.committed_bytes(), 0);
    }

    #[test]
    fn update_refuses_shared_columns() {
        let acct = Arc::new(MemoryAccountant::unbounded());
        let pool = ColumnPool::new();
        let a = pool.publish(column(&acct, &[1]));
        let b = a.clone();
        assert!(a.update(|c| c.append(&Scalar::Lng(2))).is_err());
        drop(b);
        a.update(|c| c.append(&Scalar::Lng(2))).unwrap();
        assert_eq!(a.pin().unwrap().count(), 2);
    }

    #[test]
    fn slot_reuse_after_release() {
        let acct = Arc::new(MemoryAccountant::unbounded());
        let pool = ColumnPool::new();
        let a = pool.publish(column(&acct, &[1]));
        let first = a.id();
        drop(a);
        let b = pool.publish(column(&acct, &[2]));
        assert_eq!(b.id(), first);
    }
}
