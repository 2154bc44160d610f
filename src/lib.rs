//! Demand-paged flash translation layer core.
//!
//! [`Translator`] keeps a bounded cache of the page map and writes back
//! translation pages on eviction. [`BlockManager`] hands out blocks and runs
//! garbage collection. [`Dftl`] ties both to a [`Controller`].

mod block_manager;
mod cmt;
mod config;
pub mod constants;
mod dftl;
mod error;
mod gc;
mod header;
mod stats;
mod structs;
mod translator;
mod vdevice;

pub use block_manager::*;
pub use cmt::*;
pub use config::*;
pub use dftl::*;
pub use error::*;
pub use header::*;
pub use stats::*;
pub use structs::*;
pub use translator::*;
pub use vdevice::*;
