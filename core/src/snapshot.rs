use crate::catalog::{BookRecord, Catalog};
use crate::index::{EntryId, SearchIndex};
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

/// Immutable pair of records and the title index built over them.
#[derive(Debug)]
pub struct Snapshot {
    records: Vec<BookRecord>,
    index: SearchIndex,
    generation: u64,
    built_at: OffsetDateTime,
}

impl Snapshot {
    /// The sentinel visible before the first publish.
    pub fn empty() -> Self {
        Self { records: Vec::new(), index: SearchIndex::default(), generation: 0, built_at: OffsetDateTime::now_utc() }
    }

    pub fn build(records: Vec<BookRecord>, generation: u64) -> Self {
        let index = SearchIndex::build(records.iter().map(|r| r.title.as_str()));
        Self { records, index, generation, built_at: OffsetDateTime::now_utc() }
    }

    pub fn records(&self) -> &[BookRecord] { &self.records }

    pub fn record(&self, id: EntryId) -> Option<&BookRecord> { self.records.get(id as usize) }

    pub fn index(&self) -> &SearchIndex { &self.index }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn generation(&self) -> u64 { self.generation }

    pub fn built_at(&self) -> OffsetDateTime { self.built_at }
}

/// Holds the currently visible snapshot.
///
/// Readers call [`Store::get`] and keep the returned `Arc` for as long as they
/// need a consistent view; a refresh builds a new snapshot off to the side and
/// replaces the reference in one atomic store. Refreshes are serialized, so a
/// slow refresh never gets overtaken by an older catalog read.
pub struct Store {
    current: ArcSwap<Snapshot>,
    next_generation: AtomicU64,
    refresh_guard: Mutex<()>,
}

impl Default for Store {
    fn default() -> Self { Self::new() }
}

impl Store {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
            next_generation: AtomicU64::new(1),
            refresh_guard: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Arc<Snapshot> { self.current.load_full() }

    /// Rebuild from the catalog and publish. On error the current snapshot stays.
    pub fn refresh(&self, catalog: &dyn Catalog) -> Result<Arc<Snapshot>> {
        let _guard = self.refresh_guard.lock();
        self.rebuild(catalog)
    }

    /// Like [`Store::refresh`] but returns `Ok(None)` when another refresh is running.
    pub fn try_refresh(&self, catalog: &dyn Catalog) -> Result<Option<Arc<Snapshot>>> {
        match self.refresh_guard.try_lock() {
            Some(_guard) => self.rebuild(catalog).map(Some),
            None => {
                tracing::debug!("refresh already in flight, skipping");
                Ok(None)
            }
        }
    }

    /// Build a snapshot from records already in memory and publish it.
    pub fn publish(&self, records: Vec<BookRecord>) -> Arc<Snapshot> {
        let _guard = self.refresh_guard.lock();
        self.swap_in(records)
    }

    fn rebuild(&self, catalog: &dyn Catalog) -> Result<Arc<Snapshot>> {
        let records = catalog.list_books().context("failed to refresh book entries")?;
        Ok(self.swap_in(records))
    }

    fn swap_in(&self, records: Vec<BookRecord>) -> Arc<Snapshot> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(Snapshot::build(records, generation));
        self.current.store(Arc::clone(&snapshot));
        tracing::info!(
            num_books = snapshot.len(),
            vocabulary = snapshot.index().vocabulary_size(),
            generation,
            "snapshot published"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FailingCatalog;

    impl Catalog for FailingCatalog {
        fn list_books(&self) -> Result<Vec<BookRecord>> { Err(anyhow!("catalog offline")) }
    }

    fn book(id: u64, title: &str) -> BookRecord {
        BookRecord { id, title: title.into(), authors: vec![], series: None, published: None }
    }

    #[test]
    fn starts_with_empty_sentinel() {
        let store = Store::new();
        let snap = store.get();
        assert!(snap.is_empty());
        assert_eq!(snap.generation(), 0);
    }

    #[test]
    fn refresh_publishes_new_generation() {
        let store = Store::new();
        let catalog = vec![book(1, "Solaris"), book(2, "Eden")];
        let first = store.refresh(&catalog).unwrap();
        let second = store.refresh(&catalog).unwrap();
        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        assert_eq!(store.get().generation(), 2);
        assert_eq!(store.get().len(), 2);
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let store = Store::new();
        store.publish(vec![book(1, "Solaris")]);
        assert!(store.refresh(&FailingCatalog).is_err());
        let snap = store.get();
        assert_eq!(snap.generation(), 1);
        assert_eq!(snap.record(0).unwrap().title, "Solaris");
    }

    #[test]
    fn held_snapshot_survives_publish() {
        let store = Store::new();
        store.publish(vec![book(1, "Solaris")]);
        let held = store.get();
        store.publish(vec![book(2, "Eden"), book(3, "Fiasko")]);
        assert_eq!(held.len(), 1);
        assert_eq!(held.index().len(), 1);
        assert_eq!(store.get().len(), 2);
    }
}
