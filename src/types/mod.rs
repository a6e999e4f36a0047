//! Transaction records and the views built from them.
//!
//! [`Tx`] is the unit of persistence produced by the block decoder and
//! written through the storage contract. [`BlockView`] is the read-side
//! grouping of those records per block, as served to clients.

pub mod block;
pub mod tx;

pub use block::{BlockView, pack_txs_to_blocks};
pub use tx::{Payload, Tx, WriteKv, normalize_index_key};
