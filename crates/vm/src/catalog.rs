//! Named base-column registry.
//!
//! This is the seam the surrounding compiler surface populates: base
//! columns are published into the pool, then registered here under a name
//! that `catalog.bind` instructions and the planner's row-count oracle
//! resolve.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use basalt_storage::ColumnHandle;

/// Registry of named base columns.
#[derive(Debug, Default)]
pub struct Catalog {
    columns: RwLock<HashMap<String, ColumnHandle>>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register or replace a base column.
    ///
    /// Returns `true` when an existing column with the same name was
    /// replaced (its handle is released).
    pub fn register(&self, name: impl Into<String>, handle: ColumnHandle) -> bool {
        self.columns
            .write()
            .expect("catalog lock poisoned")
            .insert(name.into(), handle)
            .is_some()
    }

    /// Deregister a base column, releasing the catalog's handle.
    ///
    /// Returns `true` when an existing column was removed.
    pub fn deregister(&self, name: &str) -> bool {
        self.columns
            .write()
            .expect("catalog lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Retained handle to a named column.
    #[must_use]
    pub fn handle(&self, name: &str) -> Option<ColumnHandle> {
        self.columns
            .read()
            .expect("catalog lock poisoned")
            .get(name)
            .cloned()
    }

    /// Row count of a named column.
    #[must_use]
    pub fn row_count(&self, name: &str) -> Option<u64> {
        let handle = self.handle(name)?;
        handle.pin().ok().map(|col| col.count() as u64)
    }
}
