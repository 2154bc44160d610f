//
// Interfaces to the rest of the simulated drive
//

use crate::block_manager::BlockManager;
use crate::error::Result;
use crate::stats::Stats;
use crate::structs::{Block, Event};

/// Storage controller the FTL core drives.
///
/// `issue` executes one simulated operation and stores the latency it took on
/// `event.time_taken`. Failure is fatal to the caller.
pub trait Controller {
    fn issue(&mut self, event: &mut Event) -> Result<()>;

    /// Block holding the linear page `address`.
    fn block(&self, address: u64) -> Result<&Block>;

    fn block_mut(&mut self, address: u64) -> Result<&mut Block>;

    fn stats(&mut self) -> &mut Stats;
}

/// Hook run by garbage collection right before a block is erased, so the owner
/// of the live mappings in it can move them out.
pub trait BlockCleanup {
    fn cleanup_block(
        &mut self,
        blocks: &mut BlockManager,
        controller: &mut dyn Controller,
        event: &mut Event,
        block_address: u64,
    ) -> Result<()>;
}
