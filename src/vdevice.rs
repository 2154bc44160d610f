//! In-memory virtual device.
//!
//! A flat array of blocks with a fixed per-cell latency for every operation.
//! It stands in for the packaged/die/plane timing model of a full simulator.

use tracing::trace;

use crate::config::SsdConfig;
use crate::error::{Error, Result};
use crate::header::Controller;
use crate::stats::Stats;
use crate::structs::{Block, CellType, Event, EventKind};

pub struct VDevice {
    stride: u64,
    blocks: Vec<Block>,
    stats: Stats,
    read_delay: [f64; 2],
    write_delay: [f64; 2],
    erase_delay: [f64; 2],
    fail_on: Option<EventKind>,
}

impl VDevice {
    pub fn new(config: &SsdConfig) -> Self {
        let stride = config.block_stride();
        let blocks = (0..u64::from(config.total_blocks()))
            .map(|i| Block::new(i * stride, config.block_size, config.slc_block_size))
            .collect();
        let per_cell = |f: fn(&SsdConfig, CellType) -> f64| {
            [f(config, CellType::Slc), f(config, CellType::Mlc)]
        };

        Self {
            stride,
            blocks,
            stats: Stats::default(),
            read_delay: per_cell(SsdConfig::read_delay),
            write_delay: per_cell(SsdConfig::write_delay),
            erase_delay: per_cell(SsdConfig::erase_delay),
            fail_on: None,
        }
    }

    /// Makes the next operation of `kind` fail.
    pub fn fail_next(&mut self, kind: EventKind) {
        self.fail_on = Some(kind);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn stats_ref(&self) -> &Stats {
        &self.stats
    }

    fn locate(&self, address: u64) -> Result<(usize, u32)> {
        let idx = address / self.stride;
        if idx >= self.blocks.len() as u64 {
            return Err(Error::AddressOutOfRange {
                address,
                limit: self.blocks.len() as u64 * self.stride,
            });
        }
        Ok((idx as usize, (address % self.stride) as u32))
    }

    fn execute(&mut self, event: &Event, address: u64) -> Option<f64> {
        let (idx, offset) = self.locate(address).ok()?;
        let cell = self.blocks[idx].cell_type().index();
        let now = event.current_time();

        if event.noop {
            return match event.kind {
                EventKind::Read => Some(self.read_delay[cell]),
                EventKind::Write => Some(self.write_delay[cell]),
                EventKind::Erase => Some(self.erase_delay[cell]),
                EventKind::Trim => Some(0.0),
            };
        }

        match event.kind {
            EventKind::Read => {
                self.blocks[idx].state(offset)?;
                Some(self.read_delay[cell])
            }
            EventKind::Write => {
                if !self.blocks[idx].program(offset, now) {
                    return None;
                }
                if let Some(old) = event.replace_address {
                    let (old_idx, old_offset) = self.locate(old).ok()?;
                    if !self.blocks[old_idx].invalidate(old_offset, now) {
                        return None;
                    }
                }
                let cell_type = self.blocks[idx].cell_type();
                self.stats.num_cell_write[cell_type] += 1;
                Some(self.write_delay[cell])
            }
            EventKind::Erase => {
                if offset != 0 {
                    return None;
                }
                self.blocks[idx].erase(now);
                Some(self.erase_delay[cell])
            }
            EventKind::Trim => self.blocks[idx].invalidate(offset, now).then_some(0.0),
        }
    }
}

impl Controller for VDevice {
    fn issue(&mut self, event: &mut Event) -> Result<()> {
        let failed = Error::IssueFailed {
            kind: event.kind,
            address: event.address,
        };
        if self.fail_on == Some(event.kind) {
            self.fail_on = None;
            return Err(failed);
        }
        let address = event.address.ok_or(Error::Invariant("issued event has no address"))?;

        let latency = self.execute(event, address).ok_or(failed)?;
        trace!(kind = ?event.kind, address, noop = event.noop, latency, "vdevice: issue");
        event.time_taken = latency;
        Ok(())
    }

    fn block(&self, address: u64) -> Result<&Block> {
        let (idx, _) = self.locate(address)?;
        Ok(&self.blocks[idx])
    }

    fn block_mut(&mut self, address: u64) -> Result<&mut Block> {
        let (idx, _) = self.locate(address)?;
        Ok(&mut self.blocks[idx])
    }

    fn stats(&mut self) -> &mut Stats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::PageState;

    fn small() -> SsdConfig {
        SsdConfig {
            block_size: 4,
            slc_block_size: 2,
            addressable_blocks: 8,
            overprovisioning_blocks: 2,
            ..SsdConfig::default()
        }
    }

    #[test]
    fn write_replaces_old_page() {
        let config = small();
        let mut dev = VDevice::new(&config);
        let mut first = Event::new(EventKind::Write, 0, 0.0, 0).at(4);
        dev.issue(&mut first).unwrap();
        assert_eq!(first.time_taken, config.mlc_write_delay);

        let mut second = Event::new(EventKind::Write, 0, 1.0, 0).at(5);
        second.replace_address = Some(4);
        dev.issue(&mut second).unwrap();

        let block = dev.block(4).unwrap();
        assert_eq!(block.state(0), Some(PageState::Invalid));
        assert_eq!(block.state(1), Some(PageState::Valid));
        assert_eq!(dev.stats_ref().num_cell_write[CellType::Mlc], 2);
    }

    #[test]
    fn rewriting_a_programmed_page_fails() {
        let mut dev = VDevice::new(&small());
        dev.issue(&mut Event::new(EventKind::Write, 0, 0.0, 0).at(0)).unwrap();
        let err = dev
            .issue(&mut Event::new(EventKind::Write, 1, 0.0, 0).at(0))
            .unwrap_err();
        assert!(matches!(err, Error::IssueFailed { kind: EventKind::Write, .. }));
    }

    #[test]
    fn shadow_io_leaves_blocks_alone() {
        let mut dev = VDevice::new(&small());
        let mut ev = Event::new(EventKind::Write, 0, 0.0, 0).at(0).shadow();
        dev.issue(&mut ev).unwrap();
        assert_eq!(dev.block(0).unwrap().pages_valid(), 0);
    }

    #[test]
    fn erase_must_be_block_aligned() {
        let mut dev = VDevice::new(&small());
        assert!(dev.issue(&mut Event::new(EventKind::Erase, 0, 0.0, 0).at(5)).is_err());
        dev.issue(&mut Event::new(EventKind::Erase, 0, 0.0, 0).at(4)).unwrap();
        assert_eq!(dev.block(4).unwrap().erase_count(), 1);
    }

    #[test]
    fn out_of_range_and_injected_failures() {
        let mut dev = VDevice::new(&small());
        assert!(dev.block(40).is_err());
        assert!(dev.issue(&mut Event::new(EventKind::Read, 0, 0.0, 0).at(40)).is_err());

        dev.fail_next(EventKind::Read);
        assert!(dev.issue(&mut Event::new(EventKind::Read, 0, 0.0, 0).at(0)).is_err());
        assert!(dev.issue(&mut Event::new(EventKind::Read, 0, 0.0, 0).at(0)).is_ok());
    }
}
