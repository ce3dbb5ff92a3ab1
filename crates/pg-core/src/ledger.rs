//! Per-tab request log and counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::types::{Disposition, ListKind, RequestType, RuleCategory};

/// Which list and rule decided a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub list: ListKind,
    pub list_name: String,
    /// Position of the list in evaluation order
    pub subscription_list_index: usize,
    pub category: RuleCategory,
    pub line: usize,
    pub matched_rule_text: String,
}

/// One classified request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequestRecord {
    pub disposition: Disposition,
    pub url: String,
    pub request_type: RequestType,
    pub provenance: Option<Provenance>,
}

/// Point-in-time copy of the ledger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total: u64,
    pub default: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub third_party_blocked: u64,
    pub faults: u64,
    pub blocked_by_list: [u64; ListKind::COUNT],
    pub allowed_by_list: [u64; ListKind::COUNT],
}

impl CounterSnapshot {
    pub fn blocked_by(&self, kind: ListKind) -> u64 {
        self.blocked_by_list[kind.index()]
    }

    pub fn allowed_by(&self, kind: ListKind) -> u64 {
        self.allowed_by_list[kind.index()]
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    default: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    third_party_blocked: AtomicU64,
    faults: AtomicU64,
    blocked_by_list: [AtomicU64; ListKind::COUNT],
    allowed_by_list: [AtomicU64; ListKind::COUNT],
}

impl Counters {
    fn all(&self) -> impl Iterator<Item = &AtomicU64> {
        [
            &self.total,
            &self.default,
            &self.allowed,
            &self.blocked,
            &self.third_party_blocked,
            &self.faults,
        ]
        .into_iter()
        .chain(&self.blocked_by_list)
        .chain(&self.allowed_by_list)
    }
}

fn load_all(counters: &[AtomicU64; ListKind::COUNT]) -> [u64; ListKind::COUNT] {
    std::array::from_fn(|i| counters[i].load(Ordering::Relaxed))
}

/// Records per sealed segment.
const SEGMENT_LEN: usize = 256;

type Segments = Vec<Arc<[ResourceRequestRecord]>>;

/// Append-only log of one tab's classified requests.
///
/// Records land in a short open segment. A full segment is sealed into an
/// immutable `Arc<[_]>` and published through an `ArcSwap`. Readers hold the
/// append lock only to load the sealed list and copy the open segment (at
/// most 256 records); sealed records are copied after it is released.
#[derive(Debug)]
pub struct RequestLedger {
    sealed: ArcSwap<Segments>,
    open: Mutex<Vec<ResourceRequestRecord>>,
    counters: Counters,
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self {
            sealed: ArcSwap::from_pointee(Vec::new()),
            open: Mutex::new(Vec::with_capacity(SEGMENT_LEN)),
            counters: Counters::default(),
        }
    }
}

/// Consistent view of a ledger at one instant. Holds no lock.
#[derive(Debug, Clone)]
pub struct LedgerView {
    sealed: Arc<Segments>,
    open: Vec<ResourceRequestRecord>,
}

impl LedgerView {
    pub fn len(&self) -> usize {
        self.sealed.iter().map(|seg| seg.len()).sum::<usize>() + self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in append order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceRequestRecord> {
        self.sealed.iter().flat_map(|seg| seg.iter()).chain(&self.open)
    }

    pub fn to_vec(&self) -> Vec<ResourceRequestRecord> {
        let mut records = Vec::with_capacity(self.len());
        records.extend(self.iter().cloned());
        records
    }
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_open(&self) -> MutexGuard<'_, Vec<ResourceRequestRecord>> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, record: ResourceRequestRecord) {
        let c = &self.counters;
        c.total.fetch_add(1, Ordering::Relaxed);
        let (bucket, by_list) = match record.disposition {
            Disposition::Default => (&c.default, None),
            Disposition::Allowed => (&c.allowed, Some(&c.allowed_by_list)),
            Disposition::Blocked => (&c.blocked, Some(&c.blocked_by_list)),
            Disposition::ThirdPartyBlocked => (&c.third_party_blocked, None),
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        if let (Some(by_list), Some(provenance)) = (by_list, &record.provenance) {
            by_list[provenance.list.index()].fetch_add(1, Ordering::Relaxed);
        }

        let mut open = self.lock_open();
        open.push(record);
        if open.len() >= SEGMENT_LEN {
            let full = std::mem::replace(&mut *open, Vec::with_capacity(SEGMENT_LEN));
            let segment: Arc<[ResourceRequestRecord]> = full.into();
            // Sealing happens under the append lock, so there is one writer.
            let mut sealed = Vec::clone(&self.sealed.load());
            sealed.push(segment);
            self.sealed.store(Arc::new(sealed));
        }
    }

    /// Count a classification fault. The request itself is appended
    /// separately with its fail-open disposition.
    pub fn record_fault(&self) {
        self.counters.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Cheap consistent view; clones only the open segment.
    pub fn view(&self) -> LedgerView {
        let open = self.lock_open();
        LedgerView {
            sealed: self.sealed.load_full(),
            open: open.clone(),
        }
    }

    /// Owned copy of every record, in append order.
    pub fn snapshot(&self) -> Vec<ResourceRequestRecord> {
        self.view().to_vec()
    }

    pub fn counters(&self) -> CounterSnapshot {
        let c = &self.counters;
        CounterSnapshot {
            total: c.total.load(Ordering::Relaxed),
            default: c.default.load(Ordering::Relaxed),
            allowed: c.allowed.load(Ordering::Relaxed),
            blocked: c.blocked.load(Ordering::Relaxed),
            third_party_blocked: c.third_party_blocked.load(Ordering::Relaxed),
            faults: c.faults.load(Ordering::Relaxed),
            blocked_by_list: load_all(&c.blocked_by_list),
            allowed_by_list: load_all(&c.allowed_by_list),
        }
    }

    /// Drop every record and reset the counters.
    pub fn clear(&self) {
        let mut open = self.lock_open();
        open.clear();
        self.sealed.store(Arc::new(Vec::new()));
        for counter in self.counters.all() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        let open = self.lock_open();
        self.sealed.load().iter().map(|seg| seg.len()).sum::<usize>() + open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
