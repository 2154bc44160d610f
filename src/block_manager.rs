//! Block pool: allocation of blocks, pool membership and the cost index GC
//! picks victims from. The GC pass itself lives in [`crate::gc`].

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use tracing::{debug, error};

use crate::config::SsdConfig;
use crate::error::{Error, Result};
use crate::header::{BlockCleanup, Controller};
use crate::stats::PerCell;
use crate::structs::{Block, BlockType, CellType, Event, EventKind};

/// Which pool collection a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Not handed out yet by the simple allocation cursor.
    Untouched,
    Free,
    Active,
    Invalidated,
}

/// Snapshot of a block as last reported through [`BlockManager::update_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CostEntry {
    pub physical_address: u64,
    pub size: u32,
    pub pages_valid: u32,
    pub pages_invalid: u32,
    pub cell_type: CellType,
}

impl CostEntry {
    fn from_block(block: &Block) -> Self {
        Self {
            physical_address: block.physical_address(),
            size: block.size(),
            pages_valid: block.pages_valid(),
            pages_invalid: block.pages_invalid(),
            cell_type: block.cell_type(),
        }
    }

    /// Higher is cheaper to reclaim.
    pub fn key(&self) -> (u32, u64) {
        (self.pages_invalid, self.physical_address)
    }

    /// No free page left and something to gain from erasing.
    pub fn reclaimable(&self) -> bool {
        self.pages_invalid > 0 && self.pages_valid + self.pages_invalid == self.size
    }

    /// Pages that would have to be relocated.
    pub fn live_pages(&self) -> u32 {
        self.size - self.pages_invalid
    }
}

pub struct BlockManager {
    pub(crate) config: SsdConfig,
    stride: u64,
    max_blocks: u64,
    max_log_blocks: Option<u64>,
    /// Overprovisioning blocks not yet claimed by SLC parity data.
    op_size: i64,

    simple_current_free: u64,
    free_list: VecDeque<u64>,
    invalid_list: Vec<u64>,
    pool_state: Vec<PoolState>,

    active_cost: Vec<CostEntry>,
    by_cost: BTreeSet<(u32, u64)>,

    data_active: PerCell,
    log_active: u64,

    pub(crate) current_writing_block: Option<u64>,
    out_of_blocks: bool,
    /// Set for the duration of a GC pass so allocations made while relocating
    /// do not start another one.
    pub(crate) collecting: bool,
    pub(crate) num_insert_events: u64,
}

impl BlockManager {
    pub fn new(config: &SsdConfig) -> Result<Self> {
        config.validate()?;
        let stride = config.block_stride();
        let total = u64::from(config.total_blocks());

        let active_cost: Vec<CostEntry> = (0..total)
            .map(|i| CostEntry {
                physical_address: i * stride,
                size: config.block_size,
                pages_valid: 0,
                pages_invalid: 0,
                cell_type: CellType::Mlc,
            })
            .collect();
        let by_cost = active_cost.iter().map(CostEntry::key).collect();

        Ok(Self {
            config: config.clone(),
            stride,
            max_blocks: u64::from(config.addressable_blocks),
            max_log_blocks: config.max_log_blocks,
            op_size: i64::from(config.overprovisioning_blocks),
            simple_current_free: 0,
            free_list: VecDeque::new(),
            invalid_list: Vec::new(),
            pool_state: vec![PoolState::Untouched; total as usize],
            active_cost,
            by_cost,
            data_active: PerCell::default(),
            log_active: 0,
            current_writing_block: None,
            out_of_blocks: false,
            collecting: false,
            num_insert_events: 0,
        })
    }

    fn position(&self, address: u64) -> Result<usize> {
        let pos = address / self.stride;
        if pos >= self.active_cost.len() as u64 {
            return Err(Error::AddressOutOfRange {
                address,
                limit: self.active_cost.len() as u64 * self.stride,
            });
        }
        Ok(pos as usize)
    }

    fn set_pool_state(&mut self, address: u64, state: PoolState) -> Result<()> {
        let pos = self.position(address)?;
        self.pool_state[pos] = state;
        Ok(())
    }

    pub fn pool_state(&self, address: u64) -> Option<PoolState> {
        self.position(address).ok().map(|pos| self.pool_state[pos])
    }

    /// Cost entries, cheapest to reclaim first.
    pub(crate) fn by_cost_desc(&self) -> impl Iterator<Item = CostEntry> + '_ {
        self.by_cost
            .iter()
            .rev()
            .map(move |&(_, address)| self.active_cost[(address / self.stride) as usize])
    }

    /// Cost entries ranked strictly below `entry`, nearest first.
    pub(crate) fn below(&self, entry: &CostEntry) -> impl Iterator<Item = CostEntry> + '_ {
        self.by_cost
            .range(..entry.key())
            .rev()
            .map(move |&(_, address)| self.active_cost[(address / self.stride) as usize])
    }

    /// Replaces the cost snapshot of `block` after its page counts changed.
    pub fn update_block(&mut self, block: &Block) -> Result<()> {
        let pos = self.position(block.physical_address())?;
        let old = self.active_cost[pos];
        let new = CostEntry::from_block(block);
        self.by_cost.remove(&old.key());
        self.by_cost.insert(new.key());
        self.active_cost[pos] = new;
        Ok(())
    }

    /// Hands out the next block: untouched blocks first, the free list after.
    pub fn get_page_block(
        &mut self,
        cleaner: &mut dyn BlockCleanup,
        controller: &mut dyn Controller,
        event: &mut Event,
    ) -> Result<u64> {
        let mut ctype = if self.config.slc_mlc_enable && event.stream_id == self.config.parity_stream {
            CellType::Slc
        } else {
            CellType::Mlc
        };

        let address = if self.simple_current_free < self.max_blocks * self.stride {
            let address = self.simple_current_free;
            self.simple_current_free += self.stride;
            address
        } else {
            if self.free_list.len() <= 1 && !self.out_of_blocks && !self.collecting {
                self.out_of_blocks = true;
                self.insert_events(cleaner, controller, event)?;
            }
            let Some(address) = self.free_list.pop_front() else {
                error!(
                    invalid = self.invalid_list.len(),
                    data_active = ?self.data_active,
                    "block_manager: free list exhausted after garbage collection"
                );
                return Err(Error::OutOfFreeBlocks);
            };
            self.out_of_blocks = false;
            address
        };
        self.current_writing_block = Some(address);

        if self.config.slc_mlc_enable {
            let block = controller.block_mut(address)?;
            let slc_active = self.data_active[CellType::Slc];
            if ctype == CellType::Slc && slc_active < self.config.slc_block_limit() {
                if slc_active >= u64::from(self.config.overprovisioning_blocks) {
                    self.op_size -= 1;
                }
                block.set_cell_type(CellType::Slc);
            } else {
                block.set_cell_type(CellType::Mlc);
                ctype = CellType::Mlc;
            }
        }

        controller.stats().num_cell_alloc[ctype] += 1;
        Ok(address)
    }

    /// Allocates a block for `block_type` and returns its base page address.
    pub fn get_free_block(
        &mut self,
        block_type: BlockType,
        cleaner: &mut dyn BlockCleanup,
        controller: &mut dyn Controller,
        event: &mut Event,
    ) -> Result<u64> {
        if block_type == BlockType::Log {
            if let Some(max) = self.max_log_blocks {
                if self.log_active >= max {
                    error!(max, "block_manager: log block ceiling reached");
                    return Err(Error::LogBlockCeiling { max });
                }
            }
        }

        let address = self.get_page_block(cleaner, controller, event)?;
        let block = controller.block_mut(address)?;
        let ctype = block.cell_type();
        block.set_block_type(block_type);
        match block_type {
            BlockType::Data => self.data_active[ctype] += 1,
            BlockType::Log => self.log_active += 1,
            BlockType::LogSeq | BlockType::Unassigned => {}
        }

        self.update_block(controller.block(address)?)?;
        self.set_pool_state(address, PoolState::Active)?;
        debug!(address, ?block_type, ?ctype, "block_manager: allocated block");
        Ok(address)
    }

    /// Moves a block to the invalidated list; it is erased by the next GC pass.
    pub fn invalidate(&mut self, address: u64, block_type: BlockType) -> Result<()> {
        let pos = self.position(address)?;
        debug_assert_eq!(self.pool_state[pos], PoolState::Active);
        let ctype = self.active_cost[pos].cell_type;
        self.invalid_list.push(address);
        self.pool_state[pos] = PoolState::Invalidated;
        self.release(block_type, ctype);
        Ok(())
    }

    /// Erases a block right away and returns it to the free list.
    pub fn erase_and_invalidate(
        &mut self,
        controller: &mut dyn Controller,
        event: &mut Event,
        address: u64,
        block_type: BlockType,
    ) -> Result<()> {
        let ctype = controller.block(address)?.cell_type();
        let mut erase = event.derive(EventKind::Erase).at(address);
        erase.start_time = event.current_time();
        self.issue_erase(controller, &mut erase)?;

        self.free_list.push_back(address);
        self.set_pool_state(address, PoolState::Free)?;
        self.release(block_type, ctype);
        event.incr_time_taken(erase.time_taken);
        Ok(())
    }

    /// Issues an erase and charges the erase counters for it.
    pub(crate) fn issue_erase(
        &mut self,
        controller: &mut dyn Controller,
        erase: &mut Event,
    ) -> Result<()> {
        let address = erase.address.ok_or(Error::Invariant("erase without address"))?;
        let ctype = controller.block(address)?.cell_type();
        if let Err(e) = controller.issue(erase) {
            error!(address, error = %e, "block_manager: erase failed");
            return Err(e);
        }

        let wear = self.config.wear_cost(ctype);
        let stats = controller.stats();
        stats.num_ftl_erase += 1;
        stats.num_ftl_wl += wear;
        stats.num_cell_erase[ctype] += 1;

        self.update_block(controller.block(address)?)
    }

    fn release(&mut self, block_type: BlockType, ctype: CellType) {
        match block_type {
            BlockType::Data => {
                debug_assert!(self.data_active[ctype] > 0);
                self.data_active[ctype] = self.data_active[ctype].saturating_sub(1);
            }
            BlockType::Log => self.log_active = self.log_active.saturating_sub(1),
            BlockType::LogSeq | BlockType::Unassigned => {}
        }
    }

    pub(crate) fn retire_victim(&mut self, address: u64, block_type: BlockType, ctype: CellType) -> Result<()> {
        self.free_list.push_back(address);
        self.set_pool_state(address, PoolState::Free)?;
        self.release(block_type, ctype);
        // Mirrors allocation: a block typed SLC while the count was at or past
        // the OP block count took one unit of budget.
        if ctype == CellType::Slc
            && self.data_active[CellType::Slc] >= u64::from(self.config.overprovisioning_blocks)
        {
            self.op_size += 1;
        }
        Ok(())
    }

    pub(crate) fn pop_invalidated(&mut self) -> Option<u64> {
        self.invalid_list.pop()
    }

    pub(crate) fn recycle_invalidated(&mut self, address: u64) -> Result<()> {
        self.free_list.push_back(address);
        self.set_pool_state(address, PoolState::Free)
    }

    pub fn add_to_free_list(&mut self, address: u64) -> Result<()> {
        let pos = self.position(address)?;
        debug_assert_ne!(self.pool_state[pos], PoolState::Free, "block already free");
        self.free_list.push_back(address);
        self.pool_state[pos] = PoolState::Free;
        Ok(())
    }

    /// Untouched blocks plus the free list.
    pub fn get_num_free_blocks(&self) -> u64 {
        let untouched = self.max_blocks - self.simple_current_free / self.stride;
        untouched + self.free_list.len() as u64
    }

    /// Moves one block between the DATA and LOG counts.
    pub fn promote_block(&mut self, to: BlockType) {
        match to {
            BlockType::Data => {
                self.data_active[CellType::Mlc] += 1;
                self.log_active = self.log_active.saturating_sub(1);
            }
            BlockType::Log => {
                self.log_active += 1;
                self.data_active[CellType::Mlc] = self.data_active[CellType::Mlc].saturating_sub(1);
            }
            BlockType::LogSeq | BlockType::Unassigned => {}
        }
    }

    pub fn is_log_full(&self) -> bool {
        self.max_log_blocks == Some(self.log_active)
    }

    pub fn data_active(&self, cell_type: CellType) -> u64 {
        self.data_active[cell_type]
    }

    pub fn log_active(&self) -> u64 {
        self.log_active
    }

    pub fn free_list(&self) -> impl Iterator<Item = u64> + '_ {
        self.free_list.iter().copied()
    }

    pub fn invalid_count(&self) -> u64 {
        self.invalid_list.len() as u64
    }

    pub fn current_writing_block(&self) -> Option<u64> {
        self.current_writing_block
    }

    /// Completed GC passes.
    pub fn num_insert_events(&self) -> u64 {
        self.num_insert_events
    }

    /// Blocks counted as in use when deciding whether to collect.
    pub fn used_blocks(&self) -> u64 {
        let data = self.data_active[CellType::Slc] + self.data_active[CellType::Mlc];
        if self.config.slc_mlc_enable {
            data
        } else {
            self.invalid_list.len() as u64 + self.log_active + data
        }
    }

    pub fn utilization(&self) -> f64 {
        self.used_blocks() as f64 / f64::from(self.config.total_blocks())
    }

    pub fn statistics(&self) -> BlockStatistics {
        let used = self.invalid_list.len() as u64
            + self.log_active
            + self.data_active[CellType::Slc]
            + self.data_active[CellType::Mlc];
        BlockStatistics {
            slc_mlc_enable: self.config.slc_mlc_enable,
            log_blocks: self.log_active,
            data_slc: self.data_active[CellType::Slc],
            data_mlc: self.data_active[CellType::Mlc],
            free_blocks: self.get_num_free_blocks(),
            invalid_blocks: self.invalid_list.len() as u64,
            free2_blocks: used as i64 - self.free_list.len() as i64,
            op_size: self.op_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStatistics {
    pub slc_mlc_enable: bool,
    pub log_blocks: u64,
    pub data_slc: u64,
    pub data_mlc: u64,
    pub free_blocks: u64,
    pub invalid_blocks: u64,
    pub free2_blocks: i64,
    pub op_size: i64,
}

impl fmt::Display for BlockStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-----------------")?;
        writeln!(f, "Block Statistics:")?;
        writeln!(f, "-----------------")?;
        writeln!(f, "Log blocks:  {}", self.log_blocks)?;
        if self.slc_mlc_enable {
            writeln!(f, "Data blocks: SLC: {} MLC: {}", self.data_slc, self.data_mlc)?;
        } else {
            writeln!(f, "Data blocks: {}", self.data_mlc)?;
        }
        writeln!(f, "Free blocks: {}", self.free_blocks)?;
        writeln!(f, "Invalid blocks: {}", self.invalid_blocks)?;
        writeln!(f, "Free2 blocks: {}", self.free2_blocks)?;
        write!(f, "-----------------")
    }
}
