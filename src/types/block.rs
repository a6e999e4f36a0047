use super::tx::Tx;
use serde::{Deserialize, Serialize};

/// Transactions of one block, grouped for clients of the read surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockView {
    pub channel_id: String,
    pub block_hash: String,
    pub previous_hash: String,
    pub block_number: u64,
    pub txs: Vec<Tx>,
}

/// Groups transaction records by block number.
///
/// Blocks appear in the order their first record is seen and records keep
/// their relative order inside a block. Block-level fields are taken from
/// the first record of each block.
#[must_use]
pub fn pack_txs_to_blocks(txs: Vec<Tx>) -> Vec<BlockView> {
    let mut blocks: Vec<BlockView> = Vec::new();

    for tx in txs {
        match blocks
            .iter_mut()
            .find(|b| b.block_number == tx.block_number && b.channel_id == tx.channel_id)
        {
            Some(block) => block.txs.push(tx),
            None => blocks.push(BlockView {
                channel_id: tx.channel_id.clone(),
                block_hash: tx.block_hash.clone(),
                previous_hash: tx.previous_block_hash.clone(),
                block_number: tx.block_number,
                txs: vec![tx],
            }),
        }
    }

    blocks
}
