//! The FTL as seen by the controller: host reads, writes and trims over the
//! translator and the block pool.

use tracing::{debug, info};

use crate::block_manager::BlockManager;
use crate::config::SsdConfig;
use crate::error::Result;
use crate::header::Controller;
use crate::structs::{Event, EventKind};
use crate::translator::Translator;

pub struct Dftl {
    translator: Translator,
    blocks: BlockManager,
}

impl Dftl {
    pub fn new(config: &SsdConfig) -> Result<Self> {
        config.validate()?;
        let translator = Translator::new(config)?;
        let mut blocks = BlockManager::new(config)?;

        // Overprovisioning blocks sit past the addressable range and start out free.
        let stride = config.block_stride();
        for i in config.addressable_blocks..config.total_blocks() {
            blocks.add_to_free_list(u64::from(i) * stride)?;
        }

        info!(
            logical_pages = config.logical_pages(),
            physical_pages = config.physical_pages(),
            cmt_entries = translator.capacity(),
            slc_mlc = config.slc_mlc_enable,
            "dftl: initialized"
        );
        Ok(Self { translator, blocks })
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn blocks(&self) -> &BlockManager {
        &self.blocks
    }

    /// Both halves at once, for callers driving them directly.
    pub fn parts_mut(&mut self) -> (&mut Translator, &mut BlockManager) {
        (&mut self.translator, &mut self.blocks)
    }

    /// Runs a GC pass if the pool is full enough.
    pub fn insert_events(&mut self, controller: &mut dyn Controller, event: &mut Event) -> Result<()> {
        self.blocks.insert_events(&mut self.translator, controller, event)
    }

    pub fn get_free_data_page(
        &mut self,
        controller: &mut dyn Controller,
        event: &mut Event,
        insert_events: bool,
    ) -> Result<u64> {
        self.translator
            .get_free_data_page(&mut self.blocks, controller, event, insert_events)
    }

    /// Reads `event.logical_address`. Never written pages read as shadow I/O.
    pub fn read(&mut self, controller: &mut dyn Controller, event: &mut Event) -> Result<()> {
        self.translator.resolve_mapping(controller, event, false)?;
        let ppn = self
            .translator
            .mapping(event.logical_address)
            .and_then(|m| m.ppn);

        let mut read = event.derive(EventKind::Read);
        read.start_time = event.current_time();
        read = match ppn {
            Some(ppn) => read.at(ppn),
            None => read.at(0).shadow(),
        };
        controller.issue(&mut read)?;
        event.address = read.address;
        event.incr_time_taken(read.time_taken);
        Ok(())
    }

    /// Writes `event.logical_address` out of place and remaps it.
    pub fn write(&mut self, controller: &mut dyn Controller, event: &mut Event) -> Result<()> {
        let lpn = event.logical_address;
        self.translator.resolve_mapping(controller, event, true)?;
        let ppn = self.get_free_data_page(controller, event, true)?;
        // Taken after allocation: collection may have relocated the old page.
        let old = self.translator.mapping(lpn).and_then(|m| m.ppn);

        let mut write = event.derive(EventKind::Write).at(ppn);
        write.start_time = event.current_time();
        write.replace_address = old;
        controller.issue(&mut write)?;
        event.address = Some(ppn);
        event.replace_address = old;
        event.incr_time_taken(write.time_taken);

        self.translator.update_translation_map(lpn, ppn)?;
        self.blocks.update_block(controller.block(ppn)?)?;
        if let Some(old) = old {
            self.blocks.update_block(controller.block(old)?)?;
        }
        debug!(lpn, ppn, ?old, "dftl: write");
        Ok(())
    }

    /// Drops the mapping of `event.logical_address` and invalidates its page.
    pub fn trim(&mut self, controller: &mut dyn Controller, event: &mut Event) -> Result<()> {
        let lpn = event.logical_address;
        self.translator.resolve_mapping(controller, event, false)?;
        let now = event.current_time();

        if let Some(ppn) = self.translator.mapping(lpn).and_then(|m| m.ppn) {
            let mut trim = event.derive(EventKind::Trim).at(ppn);
            trim.start_time = now;
            controller.issue(&mut trim)?;
            event.incr_time_taken(trim.time_taken);
            self.translator.unmap(lpn, now)?;
            self.blocks.update_block(controller.block(ppn)?)?;
        }
        controller.stats().num_ftl_trim += 1;
        Ok(())
    }
}
