//! Batching of rendered records for the embedding service
//!
//! This module holds the pieces the scheduler assembles a call from:
//! pending items, the packer that cuts them into sub-batches and the result
//! set that collects vectors and errors by record index.

mod error;
mod packer;
mod result;

pub use error::BatchError;
pub use packer::{pack, pending_items, NextBatch, Packer, Packing, PendingItem, SubBatch, TooLong};
pub use result::{BatchResult, ItemOutcome};
