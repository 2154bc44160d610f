//! Garbage collection over the block pool.
//!
//! A pass runs once utilization reaches [`GC_THRESHOLD`] and erases at most
//! [`GC_BATCH_SIZE`] blocks: invalidated blocks first, then the cheapest
//! fully written blocks from the cost index.

use tracing::{debug, info};

use crate::block_manager::{BlockManager, CostEntry, PoolState};
use crate::constants::{GC_BATCH_SIZE, GC_THRESHOLD};
use crate::error::{Error, Result};
use crate::header::{BlockCleanup, Controller};
use crate::structs::{CellType, Event, EventKind};

impl BlockManager {
    /// Runs one GC pass if the pool is full enough. Time spent is charged to
    /// `event` and to the GC elapsed time statistic.
    pub fn insert_events(
        &mut self,
        cleaner: &mut dyn BlockCleanup,
        controller: &mut dyn Controller,
        event: &mut Event,
    ) -> Result<()> {
        let ratio = self.utilization();
        if self.collecting || ratio < GC_THRESHOLD {
            return Ok(());
        }

        let time_taken = event.time_taken;
        let was_collecting = std::mem::replace(&mut self.collecting, true);
        let erased = self.collect(cleaner, controller, event);
        self.collecting = was_collecting;
        let erased = erased?;

        let elapsed = event.time_taken - time_taken;
        controller.stats().gc_elapsed_time += elapsed;
        if erased > 0 {
            info!(
                ratio,
                erased,
                elapsed,
                free = self.free_list().count(),
                "gc: pass finished"
            );
        }
        Ok(())
    }

    fn collect(
        &mut self,
        cleaner: &mut dyn BlockCleanup,
        controller: &mut dyn Controller,
        event: &mut Event,
    ) -> Result<u32> {
        let mut num_to_erase = GC_BATCH_SIZE;
        let mut erased = 0;

        while num_to_erase != 0 {
            let Some(address) = self.pop_invalidated() else {
                break;
            };
            let mut erase = Event::new(EventKind::Erase, event.logical_address, event.start_time, 0)
                .at(address);
            self.issue_erase(controller, &mut erase)?;
            event.incr_time_taken(erase.time_taken);
            self.recycle_invalidated(address)?;
            num_to_erase -= 1;
            erased += 1;
        }

        self.num_insert_events += 1;

        while num_to_erase != 0 {
            let Some(mut victim) = self.next_candidate() else {
                break;
            };
            if self.config.slc_mlc_enable && victim.cell_type != CellType::Slc {
                if let Some(slc) = self.nearest_slc(&victim) {
                    if self.eligible(&slc) && slc.live_pages() <= victim.live_pages() {
                        victim = slc;
                    }
                }
            }

            self.reclaim(victim, cleaner, controller, event)?;
            erased += 1;
            num_to_erase -= 1;
        }
        Ok(erased)
    }

    /// Cheapest eligible block to reclaim.
    fn next_candidate(&self) -> Option<CostEntry> {
        self.by_cost_desc().find(|c| self.eligible(c))
    }

    /// Fully written, something to gain, active and not being written to.
    fn eligible(&self, entry: &CostEntry) -> bool {
        entry.reclaimable()
            && self.current_writing_block != Some(entry.physical_address)
            && self.pool_state(entry.physical_address) == Some(PoolState::Active)
    }

    /// The closest SLC block ranked below `entry` that is not being written
    /// to. Only this one is weighed against `entry`.
    fn nearest_slc(&self, entry: &CostEntry) -> Option<CostEntry> {
        self.below(entry).find(|c| {
            c.cell_type == CellType::Slc && self.current_writing_block != Some(c.physical_address)
        })
    }

    fn reclaim(
        &mut self,
        victim: CostEntry,
        cleaner: &mut dyn BlockCleanup,
        controller: &mut dyn Controller,
        event: &mut Event,
    ) -> Result<()> {
        let address = victim.physical_address;
        if self.current_writing_block == Some(address) {
            return Err(Error::Invariant("writing block selected as gc victim"));
        }
        let block_type = controller.block(address)?.block_type();

        cleaner.cleanup_block(self, controller, event, address)?;

        let mut erase = event.derive(EventKind::Erase).at(address);
        self.issue_erase(controller, &mut erase)?;
        event.incr_time_taken(erase.time_taken);
        controller.stats().num_gc_erase += 1;
        self.retire_victim(address, block_type, victim.cell_type)?;

        debug!(
            address,
            cell = ?victim.cell_type,
            invalid = victim.pages_invalid,
            relocated = victim.live_pages(),
            "gc: erased victim"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_manager::tests::{pool_config, NoCleanup};
    use crate::config::SsdConfig;
    use crate::structs::BlockType;
    use crate::vdevice::VDevice;

    fn ev() -> Event {
        Event::new(EventKind::Write, 0, 0.0, 0)
    }

    /// Fills `address` completely, then invalidates its first `invalid` pages.
    fn fill(dev: &mut VDevice, bm: &mut BlockManager, address: u64, invalid: u32) {
        let size = dev.block(address).unwrap().size();
        write_pages(dev, bm, address, size, invalid);
    }

    /// Programs the first `written` pages of `address`, then invalidates the
    /// first `invalid` of them.
    fn write_pages(dev: &mut VDevice, bm: &mut BlockManager, address: u64, written: u32, invalid: u32) {
        for page in 0..u64::from(written) {
            dev.issue(&mut ev().at(address + page)).unwrap();
        }
        for page in 0..invalid {
            dev.block_mut(address).unwrap().invalidate(page, 0.0);
        }
        let snapshot = dev.block(address).unwrap().clone();
        bm.update_block(&snapshot).unwrap();
    }

    fn allocate_all(dev: &mut VDevice, bm: &mut BlockManager, n: u64) -> Vec<u64> {
        (0..n)
            .map(|_| {
                bm.get_free_block(BlockType::Data, &mut NoCleanup, dev, &mut ev())
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn below_threshold_leaves_pool_alone() {
        let config = pool_config();
        let mut dev = VDevice::new(&config);
        let mut bm = BlockManager::new(&config).unwrap();
        let blocks = allocate_all(&mut dev, &mut bm, 8);
        for &b in &blocks {
            fill(&mut dev, &mut bm, b, 2);
        }
        // 8 of 10 blocks used.
        let mut event = ev();
        bm.insert_events(&mut NoCleanup, &mut dev, &mut event).unwrap();
        assert_eq!(bm.free_list().count(), 0);
        assert_eq!(dev.stats_ref().num_ftl_erase, 0);
        assert_eq!(event.time_taken, 0.0);
    }

    #[test]
    fn reclaims_cheapest_blocks_but_not_the_writing_block() {
        let config = pool_config();
        let mut dev = VDevice::new(&config);
        let mut bm = BlockManager::new(&config).unwrap();
        bm.add_to_free_list(32).unwrap();
        bm.add_to_free_list(36).unwrap();
        let mut blocks = allocate_all(&mut dev, &mut bm, 9);
        assert_eq!(blocks.pop(), Some(32));
        for (i, &b) in blocks.iter().enumerate() {
            fill(&mut dev, &mut bm, b, (i % 4) as u32);
        }
        // The block being written is the most invalid of all.
        fill(&mut dev, &mut bm, 32, 4);
        assert_eq!(bm.current_writing_block(), Some(32));

        let mut event = ev();
        bm.insert_events(&mut NoCleanup, &mut dev, &mut event).unwrap();

        let freed: Vec<u64> = bm.free_list().collect();
        assert!(!freed.contains(&32));
        assert_eq!(bm.pool_state(32), Some(PoolState::Active));
        // Blocks with 3 invalid pages go first, highest address first on ties.
        assert_eq!(&freed[1..3], &[28, 12]);
        assert_eq!(dev.stats_ref().num_ftl_erase, freed.len() as u64 - 1);
        assert!(dev.stats_ref().gc_elapsed_time > 0.0);
        assert_eq!(event.time_taken, dev.stats_ref().gc_elapsed_time);
    }

    #[test]
    fn batch_is_bounded() {
        let config = pool_config();
        let mut dev = VDevice::new(&config);
        let mut bm = BlockManager::new(&config).unwrap();
        bm.add_to_free_list(32).unwrap();
        bm.add_to_free_list(36).unwrap();
        let blocks = allocate_all(&mut dev, &mut bm, 10);
        for &b in &blocks[..9] {
            fill(&mut dev, &mut bm, b, 1);
        }

        bm.insert_events(&mut NoCleanup, &mut dev, &mut ev()).unwrap();
        assert_eq!(dev.stats_ref().num_ftl_erase, u64::from(GC_BATCH_SIZE));
        assert_eq!(bm.free_list().count(), GC_BATCH_SIZE as usize);
    }

    #[test]
    fn invalidated_blocks_are_drained_first() {
        let config = pool_config();
        let mut dev = VDevice::new(&config);
        let mut bm = BlockManager::new(&config).unwrap();
        let blocks = allocate_all(&mut dev, &mut bm, 8);
        bm.add_to_free_list(32).unwrap();
        bm.add_to_free_list(36).unwrap();
        let last = bm
            .get_free_block(BlockType::Data, &mut NoCleanup, &mut dev, &mut ev())
            .unwrap();
        assert_eq!(last, 32);
        bm.invalidate(blocks[0], BlockType::Data).unwrap();

        // 1 invalidated + 8 data blocks.
        assert_eq!(bm.used_blocks(), 9);
        bm.insert_events(&mut NoCleanup, &mut dev, &mut ev()).unwrap();
        assert_eq!(bm.invalid_count(), 0);
        assert_eq!(bm.free_list().collect::<Vec<_>>(), vec![36, blocks[0]]);
        assert_eq!(bm.pool_state(blocks[0]), Some(PoolState::Free));
        assert_eq!(dev.block(blocks[0]).unwrap().erase_count(), 1);
    }

    #[test]
    fn slc_victim_preferred_when_no_costlier() {
        let config = SsdConfig {
            slc_mlc_enable: true,
            slc_ratio: 1.0,
            overprovisioning_blocks: 2,
            ..pool_config()
        };
        let mut dev = VDevice::new(&config);
        let mut bm = BlockManager::new(&config).unwrap();

        // Two SLC parity blocks then MLC data blocks.
        let mut parity = Event::new(EventKind::Write, 0, 0.0, config.parity_stream);
        let slc = bm
            .get_free_block(BlockType::Data, &mut NoCleanup, &mut dev, &mut parity)
            .unwrap();
        let mlc = allocate_all(&mut dev, &mut bm, 7);
        bm.add_to_free_list(32).unwrap();
        bm.add_to_free_list(36).unwrap();
        let writing = bm
            .get_free_block(BlockType::Data, &mut NoCleanup, &mut dev, &mut ev())
            .unwrap();
        let writing2 = bm
            .get_free_block(BlockType::Data, &mut NoCleanup, &mut dev, &mut ev())
            .unwrap();
        assert_eq!(dev.block(slc).unwrap().cell_type(), CellType::Slc);
        assert_eq!((writing, writing2), (32, 36));

        // SLC block (2 pages): 1 invalid, 1 live. MLC blocks: 2 invalid, 2 live.
        fill(&mut dev, &mut bm, slc, 1);
        for &b in &mlc {
            fill(&mut dev, &mut bm, b, 2);
        }
        fill(&mut dev, &mut bm, writing, 0);

        let mut event = ev();
        bm.insert_events(&mut NoCleanup, &mut dev, &mut event).unwrap();
        let freed: Vec<u64> = bm.free_list().collect();
        assert_eq!(freed[0], slc);
        assert_eq!(dev.stats_ref().num_cell_erase[CellType::Slc], 1);
        assert_eq!(bm.data_active(CellType::Slc), 0);
        // MLC erases weigh more on wear under the dual scheme.
        let mlc_erases = dev.stats_ref().num_cell_erase[CellType::Mlc];
        assert_eq!(
            dev.stats_ref().num_ftl_wl,
            1 + mlc_erases * config.mlc_erase_overhead
        );
    }

    #[test]
    fn skips_partially_written_blocks_ranked_first() {
        let config = pool_config();
        let mut dev = VDevice::new(&config);
        let mut bm = BlockManager::new(&config).unwrap();
        let blocks = allocate_all(&mut dev, &mut bm, 8);
        bm.add_to_free_list(32).unwrap();
        bm.add_to_free_list(36).unwrap();
        let writing = bm
            .get_free_block(BlockType::Data, &mut NoCleanup, &mut dev, &mut ev())
            .unwrap();
        assert_eq!(writing, 32);

        for &b in &blocks[..7] {
            fill(&mut dev, &mut bm, b, 1);
        }
        // Most invalid pages of all, but one page still free.
        write_pages(&mut dev, &mut bm, 28, 3, 2);
        write_pages(&mut dev, &mut bm, writing, 1, 0);
        assert_eq!(bm.utilization(), 0.9);

        bm.insert_events(&mut NoCleanup, &mut dev, &mut ev()).unwrap();
        assert_eq!(dev.stats_ref().num_gc_erase, u64::from(GC_BATCH_SIZE));
        assert_eq!(bm.free_list().count(), 1 + GC_BATCH_SIZE as usize);
        assert_eq!(bm.pool_state(28), Some(PoolState::Active));
        assert_eq!(bm.pool_state(writing), Some(PoolState::Active));
    }

    #[test]
    fn writing_slc_block_is_not_weighed_against_victims() {
        let config = SsdConfig {
            slc_mlc_enable: true,
            slc_ratio: 1.0,
            ..pool_config()
        };
        let mut dev = VDevice::new(&config);
        let mut bm = BlockManager::new(&config).unwrap();
        let mlc = allocate_all(&mut dev, &mut bm, 8);
        bm.add_to_free_list(32).unwrap();
        bm.add_to_free_list(36).unwrap();

        let mut parity = Event::new(EventKind::Write, 0, 0.0, config.parity_stream);
        let writing = bm
            .get_free_block(BlockType::Data, &mut NoCleanup, &mut dev, &mut parity)
            .unwrap();
        assert_eq!(writing, 32);
        assert_eq!(dev.block(writing).unwrap().cell_type(), CellType::Slc);

        // The full SLC block is cheaper to collect than any MLC block.
        fill(&mut dev, &mut bm, writing, 1);
        for &b in &mlc {
            fill(&mut dev, &mut bm, b, 2);
        }

        bm.insert_events(&mut NoCleanup, &mut dev, &mut ev()).unwrap();
        assert_eq!(dev.stats_ref().num_gc_erase, u64::from(GC_BATCH_SIZE));
        assert_eq!(dev.stats_ref().num_cell_erase[CellType::Slc], 0);
        assert!(!bm.free_list().any(|b| b == writing));
        assert_eq!(bm.pool_state(writing), Some(PoolState::Active));
    }

    #[test]
    fn reclaiming_the_writing_block_is_refused() {
        let config = pool_config();
        let mut dev = VDevice::new(&config);
        let mut bm = BlockManager::new(&config).unwrap();
        let writing = allocate_all(&mut dev, &mut bm, 1)[0];
        fill(&mut dev, &mut bm, writing, 2);

        let entry = bm
            .by_cost_desc()
            .find(|c| c.physical_address == writing)
            .unwrap();
        let err = bm
            .reclaim(entry, &mut NoCleanup, &mut dev, &mut ev())
            .unwrap_err();
        assert!(err.is_bug());
        assert_eq!(dev.block(writing).unwrap().erase_count(), 0);
        assert_eq!(bm.pool_state(writing), Some(PoolState::Active));
    }
}
