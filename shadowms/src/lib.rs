mod block_descriptor;
mod block_tree;
mod error;
pub mod format;
mod range_list;
mod source;
mod store;
mod store_block;
mod store_descriptor;
#[cfg(test)]
pub(crate) mod testutil;
mod volume;


pub use crate::block_descriptor::{BlockDescriptor, BlockFlags, BlockRangeDescriptor};
pub use crate::error::Error;
pub use crate::source::{AbortFlag, BufferSource, FileSource, VolumeSource};
pub use crate::store::{BlockView, Store};
pub use crate::volume::{OpenOptions, Volume, check_volume_signature};
