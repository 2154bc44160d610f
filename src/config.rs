//! Construction-time configuration.
//!
//! Read once when the block manager, translator and device are built, never
//! re-read. Missing TOML keys fall back to the defaults in
//! [`crate::constants`].

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::structs::CellType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsdConfig {
    /// Physical page size in bytes.
    pub page_size: u32,
    /// Pages per block; also the stride between block addresses.
    pub block_size: u32,
    /// Pages per block once a block is typed SLC.
    pub slc_block_size: u32,
    /// Blocks backing the logical address space.
    pub addressable_blocks: u32,
    /// Reserved blocks on top of the addressable ones.
    pub overprovisioning_blocks: u32,
    pub slc_mlc_enable: bool,
    /// Share of the overprovisioning budget parity data may hold as SLC.
    pub slc_ratio: f64,
    /// CMT budget in translation pages.
    pub cache_dftl_limit: u32,
    pub multistream_level: u32,
    pub parity_stream: u32,
    /// Ceiling for LOG blocks; unlimited when absent.
    pub max_log_blocks: Option<u64>,
    /// Wear units charged for one MLC erase under the dual cell scheme.
    pub mlc_erase_overhead: u64,
    pub ram_read_delay: f64,
    pub slc_read_delay: f64,
    pub slc_write_delay: f64,
    pub slc_erase_delay: f64,
    pub mlc_read_delay: f64,
    pub mlc_write_delay: f64,
    pub mlc_erase_delay: f64,
}

impl Default for SsdConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            slc_block_size: DEFAULT_SLC_BLOCK_SIZE,
            addressable_blocks: DEFAULT_ADDRESSABLE_BLOCKS,
            overprovisioning_blocks: DEFAULT_OVERPROVISIONING_BLOCKS,
            slc_mlc_enable: false,
            slc_ratio: DEFAULT_SLC_RATIO,
            cache_dftl_limit: DEFAULT_CACHE_DFTL_LIMIT,
            multistream_level: DEFAULT_MULTISTREAM_LEVEL,
            parity_stream: DEFAULT_PARITY_STREAM,
            max_log_blocks: None,
            mlc_erase_overhead: DEFAULT_MLC_ERASE_OVERHEAD,
            ram_read_delay: DEFAULT_RAM_READ_DELAY,
            slc_read_delay: DEFAULT_SLC_READ_DELAY,
            slc_write_delay: DEFAULT_SLC_WRITE_DELAY,
            slc_erase_delay: DEFAULT_SLC_ERASE_DELAY,
            mlc_read_delay: DEFAULT_MLC_READ_DELAY,
            mlc_write_delay: DEFAULT_MLC_WRITE_DELAY,
            mlc_erase_delay: DEFAULT_MLC_ERASE_DELAY,
        }
    }
}

impl SsdConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::InvalidConfig(msg.to_owned()));

        if self.block_size == 0 || self.addressable_blocks == 0 {
            return fail("block size and addressable block count must be non-zero");
        }
        if self.slc_block_size == 0 || self.slc_block_size > self.block_size {
            return fail("SLC block size must be in 1..=block_size");
        }
        if self.logical_pages() < 2 {
            return fail("at least two logical pages are required");
        }
        if self.address_per_page() == 0 || self.cmt_entries() == 0 {
            return fail("page size too small to hold one mapping entry");
        }
        if self.multistream_level == 0 {
            return fail("multistream level must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.slc_ratio) {
            return fail("SLC ratio must be within 0..=1");
        }
        Ok(())
    }

    /// Block stride in pages.
    pub fn block_stride(&self) -> u64 {
        u64::from(self.block_size)
    }

    pub fn total_blocks(&self) -> u32 {
        self.addressable_blocks + self.overprovisioning_blocks
    }

    /// Pages addressable by the host.
    pub fn logical_pages(&self) -> u64 {
        u64::from(self.addressable_blocks) * self.block_stride()
    }

    pub fn physical_pages(&self) -> u64 {
        u64::from(self.total_blocks()) * self.block_stride()
    }

    /// Bits in one logical address: `floor(log2(logical_pages))`.
    pub fn address_bits(&self) -> u32 {
        self.logical_pages().max(1).ilog2()
    }

    /// Mapping entries packed into one translation page.
    pub fn address_per_page(&self) -> u64 {
        let bytes = u64::from(self.address_bits().div_ceil(8)).max(1);
        u64::from(self.page_size) / bytes
    }

    /// Capacity of the cached mapping table, in entries.
    pub fn cmt_entries(&self) -> u64 {
        u64::from(self.cache_dftl_limit) * self.address_per_page()
    }

    /// Upper bound for SLC-typed data blocks.
    pub fn slc_block_limit(&self) -> u64 {
        (2.0 * self.slc_ratio * f64::from(self.overprovisioning_blocks)).floor() as u64
    }

    pub fn read_delay(&self, cell_type: CellType) -> f64 {
        match cell_type {
            CellType::Slc => self.slc_read_delay,
            CellType::Mlc => self.mlc_read_delay,
        }
    }

    pub fn write_delay(&self, cell_type: CellType) -> f64 {
        match cell_type {
            CellType::Slc => self.slc_write_delay,
            CellType::Mlc => self.mlc_write_delay,
        }
    }

    pub fn erase_delay(&self, cell_type: CellType) -> f64 {
        match cell_type {
            CellType::Slc => self.slc_erase_delay,
            CellType::Mlc => self.mlc_erase_delay,
        }
    }

    /// Wear units one erase of `cell_type` costs.
    pub fn wear_cost(&self, cell_type: CellType) -> u64 {
        if self.slc_mlc_enable && cell_type == CellType::Mlc {
            self.mlc_erase_overhead
        } else {
            1
        }
    }
}
