//! Demand-paged address translation.
//!
//! The full logical-to-physical map lives on flash as translation pages, each
//! holding `address_per_page` entries; the directory locating them is kept in
//! memory, so consulting it costs one page read. A bounded subset of the map
//! is cached (the CMT) and evicted least recently visited first. Evicting a
//! dirty entry writes back its whole translation page, which also cleans every
//! other cached entry sharing that page.

use std::collections::BTreeSet;

use tracing::{debug, error, info};

use crate::block_manager::BlockManager;
use crate::cmt::{MPage, TranslationMap};
use crate::config::SsdConfig;
use crate::constants::LOGICAL_TICK;
use crate::error::{Error, Result};
use crate::header::{BlockCleanup, Controller};
use crate::structs::{BlockType, CellType, Event, EventKind};

/// Translation pages live at a fixed shadow address; their I/O is charged but
/// does not touch data blocks.
const TRANSLATION_PAGE_ADDRESS: u64 = 0;

pub struct Translator {
    address_per_page: u64,
    total_cmt_entries: u64,
    block_stride: u64,
    multistream_level: u32,
    ram_read_delay: f64,
    trans_map: TranslationMap,
    reverse_trans_map: Vec<Option<u64>>,
    current_data_page: Vec<Option<u64>>,
}

impl Translator {
    pub fn new(config: &SsdConfig) -> Result<Self> {
        config.validate()?;
        let address_per_page = config.address_per_page();
        let total_cmt_entries = config.cmt_entries();
        info!(
            address_bits = config.address_bits(),
            address_per_page, total_cmt_entries, "translator: sized cached mapping table"
        );

        Ok(Self {
            address_per_page,
            total_cmt_entries,
            block_stride: config.block_stride(),
            multistream_level: config.multistream_level,
            ram_read_delay: config.ram_read_delay,
            trans_map: TranslationMap::new(config.logical_pages()),
            reverse_trans_map: vec![None; config.physical_pages() as usize],
            current_data_page: vec![None; config.multistream_level as usize],
        })
    }

    pub fn address_per_page(&self) -> u64 {
        self.address_per_page
    }

    /// CMT capacity in entries.
    pub fn capacity(&self) -> u64 {
        self.total_cmt_entries
    }

    pub fn cached_count(&self) -> u64 {
        self.trans_map.cached_count()
    }

    pub fn mapping(&self, vpn: u64) -> Option<&MPage> {
        self.trans_map.get(vpn)
    }

    /// Logical page currently held by physical page `ppn`.
    pub fn reverse(&self, ppn: u64) -> Option<u64> {
        self.reverse_trans_map.get(ppn as usize).copied().flatten()
    }

    pub fn current_data_page(&self, stream_id: u32) -> Option<u64> {
        self.current_data_page
            .get((stream_id % self.multistream_level) as usize)
            .copied()
            .flatten()
    }

    fn check_vpn(&self, vpn: u64) -> Result<()> {
        if vpn >= self.trans_map.len() {
            return Err(Error::AddressOutOfRange {
                address: vpn,
                limit: self.trans_map.len(),
            });
        }
        Ok(())
    }

    /// Makes sure `event.logical_address` has a cached mapping and records
    /// the access on it.
    pub fn resolve_mapping(
        &mut self,
        controller: &mut dyn Controller,
        event: &mut Event,
        is_write: bool,
    ) -> Result<()> {
        let dlpn = event.logical_address;
        self.check_vpn(dlpn)?;
        let now = event.start_time;

        if self.lookup_cmt(controller, event, dlpn) {
            controller.stats().num_cache_hits += 1;
            self.trans_map.update(dlpn, |m| {
                if is_write {
                    mark_dirty(m, now);
                }
                m.last_visited_time = Some(now);
            });
            return Ok(());
        }

        controller.stats().num_cache_faults += 1;
        self.evict_page_from_cache(controller, event)?;
        self.consult_gtd(controller, event, dlpn)?;

        self.trans_map.update(dlpn, |m| {
            m.create_ts = Some(now);
            m.modified_ts = Some(if is_write { now + LOGICAL_TICK } else { now });
            m.last_visited_time = Some(now);
            m.cached = true;
        });
        Ok(())
    }

    /// Cache membership check. A hit costs one RAM read.
    pub fn lookup_cmt(&self, controller: &mut dyn Controller, event: &mut Event, dlpn: u64) -> bool {
        if !self.trans_map.get(dlpn).is_some_and(|m| m.cached) {
            return false;
        }
        event.incr_time_taken(self.ram_read_delay);
        controller.stats().num_memory_read += 1;
        true
    }

    /// Reads the translation page holding `dlpn`'s entry.
    pub fn consult_gtd(
        &self,
        controller: &mut dyn Controller,
        event: &mut Event,
        dlpn: u64,
    ) -> Result<()> {
        let mut read = event.derive(EventKind::Read).at(TRANSLATION_PAGE_ADDRESS).shadow();
        if let Err(e) = controller.issue(&mut read) {
            error!(dlpn, error = %e, "translator: translation page read failed");
            return Err(e);
        }
        event.incr_time_taken(read.time_taken);
        controller.stats().num_ftl_read += 1;
        Ok(())
    }

    /// Evicts least recently visited entries until the cache is below capacity.
    pub fn evict_page_from_cache(
        &mut self,
        controller: &mut dyn Controller,
        event: &mut Event,
    ) -> Result<()> {
        while self.trans_map.cached_count() >= self.total_cmt_entries {
            let vpn = self
                .trans_map
                .least_recently_visited()
                .map(|m| m.vpn)
                .ok_or(Error::Invariant("cache count without a cached entry"))?;
            self.evict(controller, event, vpn)?;
        }
        Ok(())
    }

    /// Evicts `lpn` regardless of recency; nothing happens if it is not cached.
    pub fn evict_specific_page_from_cache(
        &mut self,
        controller: &mut dyn Controller,
        event: &mut Event,
        lpn: u64,
    ) -> Result<()> {
        self.check_vpn(lpn)?;
        if !self.trans_map.get(lpn).is_some_and(|m| m.cached) {
            return Ok(());
        }
        self.evict(controller, event, lpn)
    }

    fn evict(&mut self, controller: &mut dyn Controller, event: &mut Event, vpn: u64) -> Result<()> {
        let page = self
            .trans_map
            .get(vpn)
            .ok_or(Error::Invariant("evicting an entry outside the map"))?;
        let timestamps_set = page.create_ts.is_some_and(|t| t >= 0.0)
            && page.modified_ts.is_some_and(|t| t >= 0.0);
        debug_assert!(page.cached && timestamps_set, "evicting an uncached entry: {page:?}");
        if !page.cached || !timestamps_set {
            return Err(Error::Invariant("evicting an uncached entry or unset timestamps"));
        }

        if page.is_dirty() {
            self.write_back(controller, event, vpn)?;
        }
        self.trans_map.update(vpn, MPage::reset);
        Ok(())
    }

    /// Writes back the translation page holding `vpn`, cleaning every cached
    /// entry on it.
    fn write_back(&mut self, controller: &mut dyn Controller, event: &mut Event, vpn: u64) -> Result<()> {
        let base = vpn - vpn % self.address_per_page;
        let end = (base + self.address_per_page).min(self.trans_map.len());
        for v in base..end {
            self.trans_map.update(v, |m| {
                if m.cached {
                    m.mark_clean();
                }
            });
        }

        let mut write = event.derive(EventKind::Write).at(TRANSLATION_PAGE_ADDRESS).shadow();
        if let Err(e) = controller.issue(&mut write) {
            error!(vpn, error = %e, "translator: translation page write failed");
            return Err(e);
        }
        event.incr_time_taken(write.time_taken);

        let stats = controller.stats();
        stats.num_ftl_write += 1;
        stats.num_cell_write[CellType::Mlc] += 1;
        stats.num_gc_write += 1;
        debug!(vpn, base, "translator: wrote back translation page");
        Ok(())
    }

    /// Binds `vpn` to `ppn` and records the reverse mapping.
    pub fn update_translation_map(&mut self, vpn: u64, ppn: u64) -> Result<()> {
        self.check_vpn(vpn)?;
        let limit = self.reverse_trans_map.len() as u64;
        if ppn >= limit {
            return Err(Error::AddressOutOfRange { address: ppn, limit });
        }

        let old = self.trans_map.update(vpn, |m| m.ppn.replace(ppn)).flatten();
        if let Some(old) = old {
            let slot = &mut self.reverse_trans_map[old as usize];
            if *slot == Some(vpn) {
                *slot = None;
            }
        }
        self.reverse_trans_map[ppn as usize] = Some(vpn);
        Ok(())
    }

    /// Drops `vpn`'s physical binding and returns the page it pointed at.
    pub fn unmap(&mut self, vpn: u64, now: f64) -> Result<Option<u64>> {
        self.check_vpn(vpn)?;
        let old = self
            .trans_map
            .update(vpn, |m| {
                if m.cached {
                    mark_dirty(m, now);
                }
                m.ppn.take()
            })
            .flatten();
        if let Some(old) = old {
            self.reverse_trans_map[old as usize] = None;
        }
        Ok(old)
    }

    /// Next physical page for the event's stream. Opens a new block when the
    /// stream has none or its block is used up; `insert_events` controls
    /// whether that may start garbage collection first.
    pub fn get_free_data_page(
        &mut self,
        blocks: &mut BlockManager,
        controller: &mut dyn Controller,
        event: &mut Event,
        insert_events: bool,
    ) -> Result<u64> {
        let stream = event.stream_id % self.multistream_level;
        let idx = stream as usize;

        if self.current_data_page[idx].is_none() || (insert_events && self.is_block_end(controller, stream)?) {
            blocks.insert_events(self, controller, event)?;
        }

        // GC may have moved the cursor while relocating.
        let cursor = self.current_data_page[idx];
        let next = match cursor {
            Some(page) if !self.is_block_end(controller, stream)? => page + 1,
            _ => blocks.get_free_block(BlockType::Data, self, controller, event)?,
        };
        self.current_data_page[idx] = Some(next);
        Ok(next)
    }

    /// The stream's cursor sits on the last page of its block.
    pub fn is_block_end(&self, controller: &dyn Controller, stream_id: u32) -> Result<bool> {
        let Some(page) = self.current_data_page(stream_id) else {
            return Ok(false);
        };
        let size = u64::from(controller.block(page)?.size());
        Ok(page % self.block_stride + 1 >= size)
    }
}

/// Marks a cached entry dirty as of `now`.
fn mark_dirty(m: &mut MPage, now: f64) {
    let now = if m.create_ts == Some(now) { now + LOGICAL_TICK } else { now };
    m.modified_ts = Some(now);
}

impl BlockCleanup for Translator {
    /// Copies every valid page out of `block_address` and remaps it.
    ///
    /// Cached mappings just turn dirty. Uncached ones are patched in their
    /// translation page on flash: one read and one write per distinct page.
    fn cleanup_block(
        &mut self,
        blocks: &mut BlockManager,
        controller: &mut dyn Controller,
        event: &mut Event,
        block_address: u64,
    ) -> Result<()> {
        let block_no = block_address / self.block_stride;
        for cursor in &mut self.current_data_page {
            if cursor.is_some_and(|p| p / self.block_stride == block_no) {
                *cursor = None;
            }
        }

        let offsets: Vec<u32> = controller.block(block_address)?.valid_offsets().collect();
        let mut translation_pages = BTreeSet::new();

        for offset in offsets {
            let old = block_address + u64::from(offset);
            let vpn = self
                .reverse(old)
                .ok_or(Error::Invariant("valid page without a reverse mapping"))?;
            if self.trans_map.get(vpn).and_then(|m| m.ppn) != Some(old) {
                return Err(Error::Invariant("reverse mapping disagrees with the translation map"));
            }

            let mut read = event.derive(EventKind::Read).at(old);
            controller.issue(&mut read)?;

            let new = self.get_free_data_page(blocks, controller, event, false)?;
            let mut write = event.derive(EventKind::Write).at(new);
            write.start_time += read.time_taken;
            write.replace_address = Some(old);
            controller.issue(&mut write)?;
            event.incr_time_taken(read.time_taken + write.time_taken);

            self.update_translation_map(vpn, new)?;
            blocks.update_block(controller.block(new)?)?;

            let now = event.current_time();
            let cached = self
                .trans_map
                .update(vpn, |m| {
                    if m.cached {
                        mark_dirty(m, now);
                    }
                    m.cached
                })
                .unwrap_or(false);
            if !cached {
                translation_pages.insert(vpn / self.address_per_page);
            }

            let stats = controller.stats();
            stats.num_ftl_read += 1;
            stats.num_ftl_write += 1;
            stats.num_wl_read += 1;
            stats.num_wl_write += 1;
        }
        blocks.update_block(controller.block(block_address)?)?;

        for tpage in &translation_pages {
            let mut read = event.derive(EventKind::Read).at(TRANSLATION_PAGE_ADDRESS).shadow();
            controller.issue(&mut read)?;
            let mut write = event.derive(EventKind::Write).at(TRANSLATION_PAGE_ADDRESS).shadow();
            controller.issue(&mut write)?;
            event.incr_time_taken(read.time_taken + write.time_taken);

            let stats = controller.stats();
            stats.num_ftl_read += 1;
            stats.num_ftl_write += 1;
            stats.num_gc_read += 1;
            stats.num_gc_write += 1;
            debug!(tpage, "translator: patched translation page after relocation");
        }
        Ok(())
    }
}
