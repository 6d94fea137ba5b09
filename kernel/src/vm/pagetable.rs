// Page table store
//
// One table per process, created at fork and destroyed at quit. Tables are
// handed out as shared handles because a pager mutates the table of a
// process that is blocked in the fault handler, and the quit path walks it
// while releasing frames.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::vm::error::{VmError, VmResult};
use crate::Pid;

/// How one page is currently backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Page is resident in `frame`.
    pub incore: bool,
    pub read: bool,
    pub write: bool,
    /// Frame index; meaningful only while `incore`.
    pub frame: usize,
}

impl PageTableEntry {
    /// Entry for a page with no frame. Pages are always readable and
    /// writable in this design; residency is the only variable.
    pub(crate) fn vacant() -> Self {
        Self {
            incore: false,
            read: true,
            write: true,
            frame: 0,
        }
    }

    pub(crate) fn resident(frame: usize) -> Self {
        Self {
            incore: true,
            read: true,
            write: true,
            frame,
        }
    }
}

/// Ordered run of entries, one per page of the region.
#[derive(Debug)]
pub struct PageTable {
    entries: Box<[PageTableEntry]>,
}

impl PageTable {
    fn new(pages: usize) -> Self {
        Self {
            entries: vec![PageTableEntry::vacant(); pages].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, page: usize) -> Option<&PageTableEntry> {
        self.entries.get(page)
    }

    pub(crate) fn entry_mut(&mut self, page: usize) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(page)
    }

    pub fn entries(&self) -> &[PageTableEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [PageTableEntry] {
        &mut self.entries
    }

    /// Pages currently backed by a frame, as `(page, frame)` pairs.
    pub fn resident_pages(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.incore)
            .map(|(page, e)| (page, e.frame))
    }
}

/// Shared handle to a process's page table.
pub type PageTableRef = Arc<Mutex<PageTable>>;

struct TableStore {
    num_pages: usize,
    tables: BTreeMap<Pid, PageTableRef>,
}

lazy_static! {
    static ref TABLES: Mutex<Option<TableStore>> = Mutex::new(None);
}

pub(crate) fn init(num_pages: usize) -> VmResult<()> {
    let mut store = TABLES.lock();
    if store.is_some() {
        return Err(VmError::AlreadyInitialized);
    }
    *store = Some(TableStore {
        num_pages,
        tables: BTreeMap::new(),
    });
    Ok(())
}

pub(crate) fn shutdown() {
    *TABLES.lock() = None;
}

/// Allocate a fresh table for `pid`, replacing any previous one. Returns
/// `None` when the store is not initialized.
pub fn allocate(pid: Pid) -> Option<PageTableRef> {
    let mut guard = TABLES.lock();
    let store = guard.as_mut()?;
    let table = Arc::new(Mutex::new(PageTable::new(store.num_pages)));
    store.tables.insert(pid, Arc::clone(&table));
    log::debug!("allocated page table for pid {pid}");
    Some(table)
}

pub(crate) fn free(pid: Pid) {
    if let Some(store) = TABLES.lock().as_mut() {
        if store.tables.remove(&pid).is_some() {
            log::debug!("freed page table for pid {pid}");
        }
    }
}

/// Stable handle to the table of `pid`, valid until the table is freed.
pub fn get(pid: Pid) -> Option<PageTableRef> {
    TABLES.lock().as_ref().and_then(|s| s.tables.get(&pid).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacant_entries_are_writable_but_not_resident() {
        let table = PageTable::new(4);
        assert_eq!(table.len(), 4);
        for entry in table.entries() {
            assert!(!entry.incore);
            assert!(entry.read);
            assert!(entry.write);
        }
        assert_eq!(table.resident_pages().count(), 0);
    }

    #[test]
    fn resident_pages_reports_frames() {
        let mut table = PageTable::new(3);
        *table.entry_mut(1).unwrap() = PageTableEntry::resident(7);
        let resident: Vec<_> = table.resident_pages().collect();
        assert_eq!(resident, vec![(1, 7)]);
    }
}
