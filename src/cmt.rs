//! Translation map with its cached subset (the CMT).
//!
//! Every logical page has one [`MPage`], stored by vpn. Cached entries are
//! also kept in an ordered index by `(last_visited_time, vpn)`, so the least
//! recently visited cached entry is the first key. Entries are only mutated
//! through [`TranslationMap::update`], which keeps both views in step.

use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Mapping entry for one logical page.
///
/// Timestamps are `None` while the entry is not cached.
#[derive(Debug, Clone, PartialEq)]
pub struct MPage {
    pub vpn: u64,
    pub ppn: Option<u64>,
    pub create_ts: Option<f64>,
    pub modified_ts: Option<f64>,
    pub last_visited_time: Option<f64>,
    pub cached: bool,
}

impl MPage {
    pub fn new(vpn: u64) -> Self {
        Self {
            vpn,
            ppn: None,
            create_ts: None,
            modified_ts: None,
            last_visited_time: None,
            cached: false,
        }
    }

    /// Cached copy differs from the translation page on flash.
    pub fn is_dirty(&self) -> bool {
        self.cached && self.create_ts != self.modified_ts
    }

    /// Ordering value for eviction; uncached entries are never victims.
    pub fn eviction_priority(&self) -> f64 {
        match (self.cached, self.last_visited_time) {
            (true, Some(t)) => t,
            _ => f64::INFINITY,
        }
    }

    pub fn mark_clean(&mut self) {
        self.create_ts = self.modified_ts;
    }

    /// Drops the entry out of the cache, keeping its physical binding.
    pub fn reset(&mut self) {
        self.cached = false;
        self.create_ts = None;
        self.modified_ts = None;
        self.last_visited_time = None;
    }

    fn visit_key(&self) -> Option<VisitKey> {
        if !self.cached {
            return None;
        }
        self.last_visited_time.map(|time| VisitKey {
            time,
            vpn: self.vpn,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct VisitKey {
    time: f64,
    vpn: u64,
}

impl Ord for VisitKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.vpn.cmp(&other.vpn))
    }
}

impl PartialOrd for VisitKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VisitKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VisitKey {}

#[derive(Debug)]
pub struct TranslationMap {
    pages: Vec<MPage>,
    by_last_visited: BTreeSet<VisitKey>,
}

impl TranslationMap {
    pub fn new(logical_pages: u64) -> Self {
        Self {
            pages: (0..logical_pages).map(MPage::new).collect(),
            by_last_visited: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.pages.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, vpn: u64) -> Option<&MPage> {
        self.pages.get(usize::try_from(vpn).ok()?)
    }

    /// Mutates one entry in place and re-indexes it.
    pub fn update<R>(&mut self, vpn: u64, f: impl FnOnce(&mut MPage) -> R) -> Option<R> {
        let page = self.pages.get_mut(usize::try_from(vpn).ok()?)?;
        if let Some(key) = page.visit_key() {
            self.by_last_visited.remove(&key);
        }
        let ret = f(page);
        debug_assert_eq!(page.vpn, vpn, "vpn is immutable");
        debug_assert!(
            !page.cached || page.last_visited_time.is_some(),
            "cached entry without a visit time"
        );
        if let Some(key) = page.visit_key() {
            self.by_last_visited.insert(key);
        }
        Some(ret)
    }

    /// Cached entry with the smallest `last_visited_time`, lowest vpn on ties.
    pub fn least_recently_visited(&self) -> Option<&MPage> {
        let key = self.by_last_visited.iter().next()?;
        self.get(key.vpn)
    }

    pub fn cached_count(&self) -> u64 {
        self.by_last_visited.len() as u64
    }

    /// Cached entries, least recently visited first.
    pub fn cached(&self) -> impl Iterator<Item = &MPage> + '_ {
        self.by_last_visited
            .iter()
            .map(move |key| &self.pages[key.vpn as usize])
    }
}
