//! Block decoder: raw ledger block bytes to ordered transaction records.
//!
//! Decoding is pure and deterministic. Any sub-structure that fails to
//! unmarshal aborts the whole block with `IndexerError::DecodingError`; a
//! partially decoded block is never returned.

use crate::core::proto::{
    self, Block, BlockHeader, ChaincodeAction, ChaincodeActionPayload, ChannelHeader, ConfigEnvelope,
    ConfigGroup, ConfigUpdate, ConfigUpdateEnvelope, Envelope, HeaderType, KvRwSet,
    ProposalResponsePayload, SignatureHeader, Transaction, TxReadWriteSet,
};
use crate::types::{Payload, Tx, WriteKv};
use crate::utils::error::{IndexerError, Result};
use prost::Message;
use sha2::{Digest, Sha256};

/// Value of the `Type` entry of a CONFIG payload.
const CONFIG_TYPE: &str = "Config";

/// A decoded block: header fields plus the records it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub number: u64,
    /// Hex-encoded data hash.
    pub block_hash: String,
    /// Hex-encoded previous header hash.
    pub previous_hash: String,
    pub txs: Vec<Tx>,
}

/// One envelope of a block with its headers unpacked.
struct EnvelopeView {
    header_type: Option<HeaderType>,
    channel_id: String,
    tx_id: String,
    time: i64,
    data: Vec<u8>,
}

/// Stateless block decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockDecoder;

impl BlockDecoder {
    /// Decodes a raw block into its ordered transaction records.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DecodingError` if any part of the block is
    /// malformed.
    pub fn decode(raw: &[u8]) -> Result<Vec<Tx>> {
        Self::decode_block(raw).map(|block| block.txs)
    }

    /// Decodes a raw block, keeping its header fields.
    ///
    /// Configuration blocks (first envelope of type CONFIG, CONFIG_UPDATE or
    /// ORDERER_TRANSACTION) yield exactly one record. Any other block yields
    /// one record per namespace with writes, per endorser transaction.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DecodingError` if any part of the block is
    /// malformed.
    pub fn decode_block(raw: &[u8]) -> Result<DecodedBlock> {
        let block: Block = unmarshal(raw, "block")?;
        let Some(header) = block.header else {
            return Err(IndexerError::DecodingError("block carries no header".to_string()));
        };

        let mut decoded = DecodedBlock {
            number: header.number,
            block_hash: hex::encode(&header.data_hash),
            previous_hash: hex::encode(&header.previous_hash),
            txs: Vec::new(),
        };

        let envelopes = block.data.map(|d| d.data).unwrap_or_default();
        if envelopes.is_empty() {
            return Ok(decoded);
        }

        let filter = block
            .metadata
            .and_then(|m| m.metadata.into_iter().nth(proto::TRANSACTIONS_FILTER_INDEX))
            .unwrap_or_default();
        let validation_code =
            |index: usize| filter.get(index).map_or(0, |code| i32::from(*code));

        let first = parse_envelope(&envelopes[0])?;
        if first.header_type.is_some_and(HeaderType::is_config) {
            let payload = decode_config_payload(&first)?;
            let tx = decoded.record(&first, String::new(), payload, validation_code(0));
            decoded.txs.push(tx);
            return Ok(decoded);
        }

        for (index, raw_envelope) in envelopes.iter().enumerate() {
            let parsed = if index == 0 {
                None
            } else {
                Some(parse_envelope(raw_envelope)?)
            };
            let envelope = parsed.as_ref().unwrap_or(&first);
            if envelope.header_type != Some(HeaderType::EndorserTransaction) {
                continue;
            }

            for (namespace, writes) in namespace_writes(&envelope.data)? {
                let tx = decoded.record(
                    envelope,
                    namespace,
                    Payload::new(writes),
                    validation_code(index),
                );
                decoded.txs.push(tx);
            }
        }

        Ok(decoded)
    }
}

impl DecodedBlock {
    fn record(
        &self,
        envelope: &EnvelopeView,
        namespace: String,
        payload: Payload,
        validation_code: i32,
    ) -> Tx {
        Tx {
            channel_id: envelope.channel_id.clone(),
            tx_id: envelope.tx_id.clone(),
            namespace,
            block_hash: self.block_hash.clone(),
            previous_block_hash: self.previous_hash.clone(),
            block_number: self.number,
            payload,
            validation_code,
            time: envelope.time,
        }
    }
}

/// Decodes only what is needed to read the header of a raw block.
///
/// # Errors
///
/// Returns `IndexerError::DecodingError` if the block is malformed or has no
/// header.
pub fn decode_header(raw: &[u8]) -> Result<BlockHeader> {
    let block: Block = unmarshal(raw, "block")?;
    block
        .header
        .ok_or_else(|| IndexerError::DecodingError("block carries no header".to_string()))
}

/// Computes a transaction id the way the ledger SDK does:
/// `hex(sha256(nonce || creator))`.
#[must_use]
pub fn compute_tx_id(nonce: &[u8], creator: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator);
    hex::encode(hasher.finalize())
}

/// Unmarshals `bytes` as `M`, naming `what` in the error.
pub(crate) fn unmarshal<M: Message + Default>(bytes: &[u8], what: &str) -> Result<M> {
    M::decode(bytes)
        .map_err(|e| IndexerError::DecodingError(format!("failed to unmarshal {what}: {e}")))
}

fn parse_envelope(raw: &[u8]) -> Result<EnvelopeView> {
    let envelope: Envelope = unmarshal(raw, "envelope")?;
    let payload: proto::Payload = unmarshal(&envelope.payload, "payload")?;
    let header = payload
        .header
        .ok_or_else(|| IndexerError::DecodingError("payload carries no header".to_string()))?;
    let channel_header: ChannelHeader = unmarshal(&header.channel_header, "channel header")?;

    let time = channel_header
        .timestamp
        .as_ref()
        .map(|ts| ts.seconds)
        .ok_or_else(|| {
            IndexerError::DecodingError("channel header carries no timestamp".to_string())
        })?;

    let tx_id = if channel_header.tx_id.is_empty() {
        let signature_header: SignatureHeader =
            unmarshal(&header.signature_header, "signature header")?;
        compute_tx_id(&signature_header.nonce, &signature_header.creator)
    } else {
        channel_header.tx_id
    };

    Ok(EnvelopeView {
        header_type: HeaderType::try_from(channel_header.r#type).ok(),
        channel_id: channel_header.channel_id,
        tx_id,
        time,
        data: payload.data,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration blocks
// ─────────────────────────────────────────────────────────────────────────────

fn decode_config_payload(envelope: &EnvelopeView) -> Result<Payload> {
    match envelope.header_type {
        Some(HeaderType::Config) => config_payload(&envelope.data),
        Some(HeaderType::ConfigUpdate) => config_update_payload(&envelope.data),
        Some(HeaderType::OrdererTransaction) => {
            let inner = parse_envelope(&envelope.data)?;
            match inner.header_type {
                Some(HeaderType::Config) => config_payload(&inner.data),
                Some(HeaderType::ConfigUpdate) => config_update_payload(&inner.data),
                other => Err(IndexerError::DecodingError(format!(
                    "unresolvable config envelope type {other:?} inside orderer transaction"
                ))),
            }
        }
        other => Err(IndexerError::DecodingError(format!(
            "not a config envelope type: {other:?}"
        ))),
    }
}

fn config_payload(data: &[u8]) -> Result<Payload> {
    let envelope: ConfigEnvelope = unmarshal(data, "config envelope")?;
    let config = envelope.config.ok_or_else(|| {
        IndexerError::DecodingError("config envelope carries no config".to_string())
    })?;
    let group = config.channel_group.ok_or_else(|| {
        IndexerError::DecodingError("config carries no channel group".to_string())
    })?;

    Ok(Payload::new(vec![
        WriteKv::new("Type", CONFIG_TYPE),
        WriteKv::new("Sequence", config.sequence.to_string()),
        WriteKv::new("Version", group.version.to_string()),
        WriteKv::new("Groups", serde_json::to_vec(&group.groups)?),
        WriteKv::new("Values", serde_json::to_vec(&group.values)?),
        WriteKv::new("Policies", serde_json::to_vec(&group.policies)?),
        WriteKv::new("ModPolicy", group.mod_policy),
    ]))
}

fn config_update_payload(data: &[u8]) -> Result<Payload> {
    let envelope: ConfigUpdateEnvelope = unmarshal(data, "config update envelope")?;
    let update: ConfigUpdate = unmarshal(&envelope.config_update, "config update")?;

    Ok(Payload::new(vec![
        WriteKv::new("ChannelId", update.channel_id),
        WriteKv::new("ReadSet", group_json(update.read_set.as_ref())?),
        WriteKv::new("WriteSet", group_json(update.write_set.as_ref())?),
    ]))
}

fn group_json(group: Option<&ConfigGroup>) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&group)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Endorser transactions
// ─────────────────────────────────────────────────────────────────────────────

/// Returns `(namespace, writes)` for every namespace of the transaction's
/// first action that has at least one write, in read/write-set order.
fn namespace_writes(data: &[u8]) -> Result<Vec<(String, Vec<WriteKv>)>> {
    let transaction: Transaction = unmarshal(data, "transaction")?;
    let Some(action) = transaction.actions.first() else {
        return Ok(Vec::new());
    };

    let action_payload: ChaincodeActionPayload =
        unmarshal(&action.payload, "chaincode action payload")?;
    let response_bytes = action_payload
        .action
        .map(|a| a.proposal_response_payload)
        .unwrap_or_default();
    let response: ProposalResponsePayload =
        unmarshal(&response_bytes, "proposal response payload")?;
    let chaincode_action: ChaincodeAction = unmarshal(&response.extension, "chaincode action")?;
    let rwset: TxReadWriteSet = unmarshal(&chaincode_action.results, "read/write-set")?;

    let mut out = Vec::new();
    for ns in rwset.ns_rwset {
        let kv: KvRwSet = unmarshal(
            &ns.rwset,
            &format!("read/write-set of namespace '{}'", ns.namespace),
        )?;
        if kv.writes.is_empty() {
            continue;
        }
        let writes = kv
            .writes
            .into_iter()
            .map(|w| WriteKv::new(w.key, w.value))
            .collect();
        out.push((ns.namespace, writes));
    }

    Ok(out)
}
