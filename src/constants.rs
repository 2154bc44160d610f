//
// Garbage collection
//

/// Utilization (used blocks / total blocks) at which a GC pass starts reclaiming.
pub const GC_THRESHOLD: f64 = 0.9;
/// Upper bound of erases performed by one GC pass.
pub const GC_BATCH_SIZE: u32 = 5;

//
// Translation
//

/// Added to `modified_ts` when a write faults a mapping in, so it is dirty at once.
pub const LOGICAL_TICK: f64 = 1.0;

//
// Default hardware configuration
//

pub const DEFAULT_PAGE_SIZE: u32 = 4096;
pub const DEFAULT_BLOCK_SIZE: u32 = 64;
pub const DEFAULT_SLC_BLOCK_SIZE: u32 = DEFAULT_BLOCK_SIZE / 2;
pub const DEFAULT_ADDRESSABLE_BLOCKS: u32 = 1024;
pub const DEFAULT_OVERPROVISIONING_BLOCKS: u32 = 64;
pub const DEFAULT_SLC_RATIO: f64 = 0.5;
pub const DEFAULT_CACHE_DFTL_LIMIT: u32 = 8;
pub const DEFAULT_MULTISTREAM_LEVEL: u32 = 4;
pub const DEFAULT_PARITY_STREAM: u32 = 1;
pub const DEFAULT_MLC_ERASE_OVERHEAD: u64 = 2;

//
// Default latencies (simulated microseconds)
//

pub const DEFAULT_RAM_READ_DELAY: f64 = 0.000_01;
pub const DEFAULT_SLC_READ_DELAY: f64 = 25.0;
pub const DEFAULT_SLC_WRITE_DELAY: f64 = 200.0;
pub const DEFAULT_SLC_ERASE_DELAY: f64 = 1500.0;
pub const DEFAULT_MLC_READ_DELAY: f64 = 50.0;
pub const DEFAULT_MLC_WRITE_DELAY: f64 = 600.0;
pub const DEFAULT_MLC_ERASE_DELAY: f64 = 3000.0;
