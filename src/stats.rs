use std::fmt;
use std::ops::{Index, IndexMut};

use serde::Serialize;

use crate::structs::CellType;

/// One counter per cell type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerCell([u64; 2]);

impl Index<CellType> for PerCell {
    type Output = u64;

    fn index(&self, cell_type: CellType) -> &u64 {
        &self.0[cell_type.index()]
    }
}

impl IndexMut<CellType> for PerCell {
    fn index_mut(&mut self, cell_type: CellType) -> &mut u64 {
        &mut self.0[cell_type.index()]
    }
}

/// Statistics sink shared by the controller, the translator and the block manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    // FTL
    pub num_ftl_read: u64,
    pub num_ftl_write: u64,
    pub num_ftl_erase: u64,
    /// Wear units, MLC erases weighted by the erase overhead.
    pub num_ftl_wl: u64,
    pub num_ftl_trim: u64,

    pub num_cell_alloc: PerCell,
    pub num_cell_write: PerCell,
    pub num_cell_erase: PerCell,

    pub gc_elapsed_time: f64,

    // GC
    pub num_gc_read: u64,
    pub num_gc_write: u64,
    pub num_gc_erase: u64,

    // WL
    pub num_wl_read: u64,
    pub num_wl_write: u64,
    pub num_wl_erase: u64,

    // Cache
    pub num_cache_hits: u64,
    pub num_cache_faults: u64,

    pub num_memory_read: u64,
    pub num_memory_write: u64,
}

impl Stats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.num_cache_hits + self.num_cache_faults;
        if total == 0 {
            return 0.0;
        }
        self.num_cache_hits as f64 / total as f64
    }

    /// Space separated single line, suited for collecting runs in a table.
    pub fn custom_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} {:.6} {} {} {} {} {} {} {}",
            self.num_ftl_read,
            self.num_ftl_write,
            self.num_ftl_erase,
            self.num_wl_read,
            self.num_wl_write,
            self.num_ftl_wl,
            self.gc_elapsed_time,
            self.num_cell_alloc[CellType::Mlc],
            self.num_cell_alloc[CellType::Slc],
            self.num_cell_write[CellType::Mlc],
            self.num_cell_write[CellType::Slc],
            self.num_cell_erase[CellType::Mlc],
            self.num_cell_erase[CellType::Slc],
            self.num_wl_erase,
        )
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics:")?;
        writeln!(f, "-----------")?;
        writeln!(
            f,
            "FTL Reads: {}\t Writes: {}\t Erases: {}\t Trims: {}",
            self.num_ftl_read, self.num_ftl_write, self.num_ftl_erase, self.num_ftl_trim
        )?;
        writeln!(
            f,
            "GC  Reads: {}\t Writes: {}\t Erases: {}",
            self.num_gc_read, self.num_gc_write, self.num_gc_erase
        )?;
        writeln!(
            f,
            "WL  Reads: {}\t Writes: {}\t Erases: {}",
            self.num_wl_read, self.num_wl_write, self.num_wl_erase
        )?;
        writeln!(
            f,
            "Cache Hits: {} Faults: {} Hit Ratio: {:.6}",
            self.num_cache_hits,
            self.num_cache_faults,
            self.hit_ratio()
        )?;
        writeln!(
            f,
            "Memory Reads: {} \t Writes: {}",
            self.num_memory_read, self.num_memory_write
        )?;
        writeln!(f, "Overheads:")?;
        writeln!(
            f,
            "\tErase: MLC: {}\t SLC: {}\t GC Elapsed: {:.6}",
            self.num_cell_erase[CellType::Mlc],
            self.num_cell_erase[CellType::Slc],
            self.gc_elapsed_time
        )?;
        writeln!(
            f,
            "\tWrite: MLC: {}\t SLC: {}",
            self.num_cell_write[CellType::Mlc],
            self.num_cell_write[CellType::Slc]
        )?;
        write!(f, "-----------")
    }
}
