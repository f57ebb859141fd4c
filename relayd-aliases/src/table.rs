use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;
use arc_swap::ArcSwap;

use crate::record::AliasRecord;

/// One immutable generation of the alias table.
#[derive(Debug, Default)]
pub struct Snapshot {
    version: u64,
    records: AHashMap<String, AliasRecord>,
}

impl Snapshot {
    /// Builds a snapshot; later records replace earlier ones with the same source.
    fn build(version: u64, records: impl IntoIterator<Item = AliasRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.source().to_string(), record))
            .collect();

        Self { version, records }
    }

    #[inline]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn get(&self, source: &str) -> Option<&AliasRecord> {
        self.records.get(source)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The process-wide alias table.
///
/// Readers load the current [`Snapshot`] without locking; a refresh builds a
/// complete replacement and publishes it with a single pointer swap.
pub struct AliasTable {
    current: ArcSwap<Snapshot>,
    versions: AtomicU64,
}

impl AliasTable {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            versions: AtomicU64::new(0),
        }
    }

    /// Looks `recipient` up in whichever snapshot is current right now.
    pub fn lookup(&self, recipient: &str) -> Option<AliasRecord> {
        self.current.load().get(recipient).cloned()
    }

    /// Returns the current snapshot, for callers needing several consistent reads.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Replaces the whole table and returns the new version.
    pub fn replace(&self, records: impl IntoIterator<Item = AliasRecord>) -> u64 {
        let version = self.versions.fetch_add(1, Ordering::AcqRel) + 1;
        self.current.store(Arc::new(Snapshot::build(version, records)));
        version
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for AliasTable {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let current = self.current.load();
        fmt.debug_struct("AliasTable")
            .field("version", &current.version())
            .field("len", &current.len())
            .finish()
    }
}
