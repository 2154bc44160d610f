use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    Slc,
    Mlc,
}

impl CellType {
    pub const ALL: [CellType; 2] = [CellType::Slc, CellType::Mlc];

    pub fn index(self) -> usize {
        match self {
            CellType::Slc => 0,
            CellType::Mlc => 1,
        }
    }
}

/// Role a block was handed out for. Blocks sitting in the pool are `Unassigned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    Data,
    Log,
    LogSeq,
    Unassigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Empty,
    Valid,
    Invalid,
}

/// Physical block state, owned by the controller.
///
/// Pages are addressed linearly: page `i` of this block is
/// `physical_address + i`. The stride between blocks is always the MLC block
/// size, an SLC block just uses fewer of its pages.
#[derive(Debug, Clone)]
pub struct Block {
    physical_address: u64,
    size: u32,
    mlc_size: u32,
    slc_size: u32,
    cell_type: CellType,
    block_type: BlockType,
    pages: Vec<PageState>,
    pages_valid: u32,
    pages_invalid: u32,
    erase_count: u64,
    last_modified_time: f64,
}

impl Block {
    pub fn new(physical_address: u64, mlc_size: u32, slc_size: u32) -> Self {
        Self {
            physical_address,
            size: mlc_size,
            mlc_size,
            slc_size,
            cell_type: CellType::Mlc,
            block_type: BlockType::Unassigned,
            pages: vec![PageState::Empty; mlc_size as usize],
            pages_valid: 0,
            pages_invalid: 0,
            erase_count: 0,
            last_modified_time: 0.0,
        }
    }

    pub fn physical_address(&self) -> u64 {
        self.physical_address
    }

    /// Usable pages, which depends on the cell type.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn pages_valid(&self) -> u32 {
        self.pages_valid
    }

    pub fn pages_invalid(&self) -> u32 {
        self.pages_invalid
    }

    pub fn pages_free(&self) -> u32 {
        self.size - self.pages_valid - self.pages_invalid
    }

    pub fn erase_count(&self) -> u64 {
        self.erase_count
    }

    pub fn last_modified_time(&self) -> f64 {
        self.last_modified_time
    }

    pub fn state(&self, offset: u32) -> Option<PageState> {
        if offset >= self.size {
            return None;
        }
        self.pages.get(offset as usize).copied()
    }

    /// Re-types an empty block; SLC blocks shrink to the SLC page count.
    pub fn set_cell_type(&mut self, cell_type: CellType) {
        debug_assert!(
            self.pages_valid == 0 && self.pages_invalid == 0,
            "re-typing a block holding data"
        );
        self.cell_type = cell_type;
        self.size = match cell_type {
            CellType::Slc => self.slc_size,
            CellType::Mlc => self.mlc_size,
        };
    }

    pub fn set_block_type(&mut self, block_type: BlockType) {
        self.block_type = block_type;
    }

    /// Programs an empty page. Returns `false` if the page is not writable.
    pub fn program(&mut self, offset: u32, time: f64) -> bool {
        if offset >= self.size || self.pages[offset as usize] != PageState::Empty {
            return false;
        }
        self.pages[offset as usize] = PageState::Valid;
        self.pages_valid += 1;
        self.last_modified_time = time;
        true
    }

    /// Marks a valid page stale. Returns `false` if it held no valid data.
    pub fn invalidate(&mut self, offset: u32, time: f64) -> bool {
        if offset >= self.size || self.pages[offset as usize] != PageState::Valid {
            return false;
        }
        self.pages[offset as usize] = PageState::Invalid;
        self.pages_valid -= 1;
        self.pages_invalid += 1;
        self.last_modified_time = time;
        true
    }

    pub fn erase(&mut self, time: f64) {
        self.pages.iter_mut().for_each(|p| *p = PageState::Empty);
        self.pages_valid = 0;
        self.pages_invalid = 0;
        self.block_type = BlockType::Unassigned;
        self.erase_count += 1;
        self.last_modified_time = time;
    }

    pub fn valid_offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.size).filter(move |&i| self.pages[i as usize] == PageState::Valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Read,
    Write,
    Erase,
    Trim,
}

/// One simulated access. Elapsed simulated time is accumulated on
/// `time_taken` by everything done on its behalf.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub logical_address: u64,
    pub size: u32,
    pub start_time: f64,
    pub time_taken: f64,
    pub stream_id: u32,
    /// Physical page, or block base page for erases.
    pub address: Option<u64>,
    /// Page made stale by a write.
    pub replace_address: Option<u64>,
    /// Shadow I/O: charged latency, no state change.
    pub noop: bool,
}

impl Event {
    pub fn new(kind: EventKind, logical_address: u64, start_time: f64, stream_id: u32) -> Self {
        Self {
            kind,
            logical_address,
            size: 1,
            start_time,
            time_taken: 0.0,
            stream_id,
            address: None,
            replace_address: None,
            noop: false,
        }
    }

    /// A child operation issued on behalf of `self`.
    pub fn derive(&self, kind: EventKind) -> Self {
        Self::new(kind, self.logical_address, self.start_time, self.stream_id)
    }

    pub fn at(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub fn shadow(mut self) -> Self {
        self.noop = true;
        self
    }

    pub fn incr_time_taken(&mut self, delta: f64) {
        self.time_taken += delta;
    }

    pub fn current_time(&self) -> f64 {
        self.start_time + self.time_taken
    }
}
