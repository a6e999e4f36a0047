//! Wire-encoded ledger block generation.
//!
//! [`BlockBuilder`] assembles blocks the way an ordering service would emit
//! them: envelopes with signed headers, endorser transactions carrying
//! read/write-sets, configuration envelopes, and the transactions filter in
//! the block metadata. Used by fixtures, benches and the `block-generator`
//! binary.

use crate::core::proto::{
    self, Block, BlockData, BlockHeader, BlockMetadata, ChaincodeAction, ChaincodeActionPayload,
    ChaincodeEndorsedAction, ChannelHeader, Config, ConfigEnvelope, ConfigGroup, ConfigUpdate,
    ConfigUpdateEnvelope, Envelope, Header, HeaderType, KvRead, KvRwSet, KvWrite, NsReadWriteSet,
    ProposalResponsePayload, SignatureHeader, Transaction, TransactionAction, TxReadWriteSet,
};
use prost::Message;
use sha2::{Digest, Sha256};

/// Reads and writes of one namespace inside an endorser transaction.
#[derive(Debug, Clone, Default)]
pub struct NsRwSet {
    namespace: String,
    reads: Vec<String>,
    writes: Vec<(String, Vec<u8>)>,
}

impl NsRwSet {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn read(mut self, key: impl Into<String>) -> Self {
        self.reads.push(key.into());
        self
    }

    #[must_use]
    pub fn write(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.writes.push((key.into(), value.into()));
        self
    }

    fn encode(&self) -> NsReadWriteSet {
        let kv = KvRwSet {
            reads: self
                .reads
                .iter()
                .map(|key| KvRead {
                    key: key.clone(),
                    version: None,
                })
                .collect(),
            range_queries_info: Vec::new(),
            writes: self
                .writes
                .iter()
                .map(|(key, value)| KvWrite {
                    key: key.clone(),
                    is_delete: false,
                    value: value.clone(),
                })
                .collect(),
            metadata_writes: Vec::new(),
        };
        NsReadWriteSet {
            namespace: self.namespace.clone(),
            rwset: kv.encode_to_vec(),
        }
    }
}

/// An endorser transaction to put into a block.
#[derive(Debug, Clone)]
pub struct EndorserTx {
    tx_id: String,
    creator: Vec<u8>,
    nonce: Vec<u8>,
    validation_code: u8,
    namespaces: Vec<NsRwSet>,
}

impl EndorserTx {
    /// Creates a transaction with an explicit id. An empty id makes the
    /// decoder derive it from the signature header.
    pub fn new(tx_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            creator: b"Org1MSP".to_vec(),
            nonce: b"nonce".to_vec(),
            validation_code: 0,
            namespaces: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_signer(mut self, creator: impl Into<Vec<u8>>, nonce: impl Into<Vec<u8>>) -> Self {
        self.creator = creator.into();
        self.nonce = nonce.into();
        self
    }

    #[must_use]
    pub fn with_validation_code(mut self, code: u8) -> Self {
        self.validation_code = code;
        self
    }

    #[must_use]
    pub fn namespace(mut self, ns: NsRwSet) -> Self {
        self.namespaces.push(ns);
        self
    }
}

/// Hash of an encoded block header, used as the next block's
/// `previous_hash`.
#[must_use]
pub fn header_hash(header: &BlockHeader) -> Vec<u8> {
    Sha256::digest(header.encode_to_vec()).to_vec()
}

/// Builder for wire-encoded blocks.
///
/// # Example
///
/// ```
/// use fabric_indexer::generator::{BlockBuilder, EndorserTx, NsRwSet};
///
/// let raw = BlockBuilder::new("mychannel", 5)
///     .endorser(
///         EndorserTx::new("tx1")
///             .namespace(NsRwSet::new("ns1").write("k1", b"v1".to_vec()))
///             .namespace(NsRwSet::new("ns2").read("k3")),
///     )
///     .build();
/// assert!(!raw.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    channel_id: String,
    number: u64,
    previous_hash: Vec<u8>,
    timestamp: Option<i64>,
    transactions_filter: bool,
    envelopes: Vec<Vec<u8>>,
    validation_codes: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(channel_id: impl Into<String>, number: u64) -> Self {
        Self {
            channel_id: channel_id.into(),
            number,
            previous_hash: Vec::new(),
            timestamp: Some(1_700_000_000),
            transactions_filter: true,
            envelopes: Vec::new(),
            validation_codes: Vec::new(),
        }
    }

    #[must_use]
    pub fn previous_hash(mut self, hash: impl Into<Vec<u8>>) -> Self {
        self.previous_hash = hash.into();
        self
    }

    /// Sets the channel header timestamp (Unix seconds) of envelopes added
    /// afterwards.
    #[must_use]
    pub fn timestamp(mut self, seconds: i64) -> Self {
        self.timestamp = Some(seconds);
        self
    }

    /// Envelopes added afterwards carry no channel header timestamp.
    #[must_use]
    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }

    /// Leaves the transactions filter out of the block metadata.
    #[must_use]
    pub fn without_transactions_filter(mut self) -> Self {
        self.transactions_filter = false;
        self
    }

    #[must_use]
    pub fn endorser(self, tx: EndorserTx) -> Self {
        let rwset = TxReadWriteSet {
            data_model: 0,
            ns_rwset: tx.namespaces.iter().map(NsRwSet::encode).collect(),
        };
        let cc_action = ChaincodeAction {
            results: rwset.encode_to_vec(),
            events: Vec::new(),
        };
        let response = ProposalResponsePayload {
            proposal_hash: Vec::new(),
            extension: cc_action.encode_to_vec(),
        };
        let action_payload = ChaincodeActionPayload {
            chaincode_proposal_payload: Vec::new(),
            action: Some(ChaincodeEndorsedAction {
                proposal_response_payload: response.encode_to_vec(),
                endorsements: Vec::new(),
            }),
        };
        let transaction = Transaction {
            actions: vec![TransactionAction {
                header: Vec::new(),
                payload: action_payload.encode_to_vec(),
            }],
        };

        let envelope = self.envelope(
            HeaderType::EndorserTransaction,
            &tx.tx_id,
            &tx.creator,
            &tx.nonce,
            transaction.encode_to_vec(),
        );
        self.push(envelope, tx.validation_code)
    }

    /// Adds a CONFIG envelope carrying `channel_group` at `sequence`.
    #[must_use]
    pub fn config(self, tx_id: &str, sequence: u64, channel_group: ConfigGroup) -> Self {
        let data = Self::config_envelope(sequence, channel_group);
        let envelope = self.envelope(HeaderType::Config, tx_id, b"orderer", b"nonce", data);
        self.push(envelope, 0)
    }

    /// Adds a CONFIG_UPDATE envelope.
    #[must_use]
    pub fn config_update(
        self,
        tx_id: &str,
        read_set: Option<ConfigGroup>,
        write_set: Option<ConfigGroup>,
    ) -> Self {
        let data = self.config_update_envelope(read_set, write_set);
        let envelope = self.envelope(HeaderType::ConfigUpdate, tx_id, b"admin", b"nonce", data);
        self.push(envelope, 0)
    }

    /// Adds an ORDERER_TRANSACTION envelope wrapping a CONFIG envelope.
    #[must_use]
    pub fn orderer_config(self, tx_id: &str, sequence: u64, channel_group: ConfigGroup) -> Self {
        let inner_data = Self::config_envelope(sequence, channel_group);
        let inner = self.envelope(HeaderType::Config, tx_id, b"orderer", b"inner", inner_data);
        let envelope = self.envelope(
            HeaderType::OrdererTransaction,
            tx_id,
            b"orderer",
            b"nonce",
            inner,
        );
        self.push(envelope, 0)
    }

    /// Adds an ORDERER_TRANSACTION envelope wrapping an envelope of
    /// `inner_type` with opaque `inner_data`.
    #[must_use]
    pub fn orderer_wrapping(self, tx_id: &str, inner_type: HeaderType, inner_data: Vec<u8>) -> Self {
        let inner = self.envelope(inner_type, tx_id, b"orderer", b"inner", inner_data);
        let envelope = self.envelope(
            HeaderType::OrdererTransaction,
            tx_id,
            b"orderer",
            b"nonce",
            inner,
        );
        self.push(envelope, 0)
    }

    /// Adds an envelope of `header_type` with opaque `data`.
    #[must_use]
    pub fn typed_envelope(self, header_type: HeaderType, tx_id: &str, data: Vec<u8>) -> Self {
        let envelope = self.envelope(header_type, tx_id, b"client", b"nonce", data);
        self.push(envelope, 0)
    }

    /// Adds raw bytes as a block data entry.
    #[must_use]
    pub fn raw_envelope(self, bytes: Vec<u8>) -> Self {
        self.push(bytes, 0)
    }

    /// The data hash the built block will carry.
    #[must_use]
    pub fn data_hash(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        for envelope in &self.envelopes {
            hasher.update(envelope);
        }
        hasher.finalize().to_vec()
    }

    #[must_use]
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            number: self.number,
            previous_hash: self.previous_hash.clone(),
            data_hash: self.data_hash(),
        }
    }

    /// Encodes the block.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut metadata = vec![Vec::new(); proto::TRANSACTIONS_FILTER_INDEX + 2];
        if self.transactions_filter {
            metadata[proto::TRANSACTIONS_FILTER_INDEX] = self.validation_codes.clone();
        }

        Block {
            header: Some(self.header()),
            data: Some(BlockData {
                data: self.envelopes,
            }),
            metadata: Some(BlockMetadata { metadata }),
        }
        .encode_to_vec()
    }

    fn push(mut self, envelope: Vec<u8>, validation_code: u8) -> Self {
        self.envelopes.push(envelope);
        self.validation_codes.push(validation_code);
        self
    }

    fn envelope(
        &self,
        header_type: HeaderType,
        tx_id: &str,
        creator: &[u8],
        nonce: &[u8],
        data: Vec<u8>,
    ) -> Vec<u8> {
        let channel_header = ChannelHeader {
            r#type: header_type as i32,
            version: 0,
            timestamp: self.timestamp.map(|seconds| prost_types::Timestamp { seconds, nanos: 0 }),
            channel_id: self.channel_id.clone(),
            tx_id: tx_id.to_string(),
            epoch: 0,
            extension: Vec::new(),
            tls_cert_hash: Vec::new(),
        };
        let signature_header = SignatureHeader {
            creator: creator.to_vec(),
            nonce: nonce.to_vec(),
        };
        let payload = proto::Payload {
            header: Some(Header {
                channel_header: channel_header.encode_to_vec(),
                signature_header: signature_header.encode_to_vec(),
            }),
            data,
        };
        Envelope {
            payload: payload.encode_to_vec(),
            signature: Vec::new(),
        }
        .encode_to_vec()
    }

    fn config_envelope(sequence: u64, channel_group: ConfigGroup) -> Vec<u8> {
        ConfigEnvelope {
            config: Some(Config {
                sequence,
                channel_group: Some(channel_group),
            }),
            last_update: None,
        }
        .encode_to_vec()
    }

    fn config_update_envelope(
        &self,
        read_set: Option<ConfigGroup>,
        write_set: Option<ConfigGroup>,
    ) -> Vec<u8> {
        let update = ConfigUpdate {
            channel_id: self.channel_id.clone(),
            read_set,
            write_set,
            isolated_data: Default::default(),
        };
        ConfigUpdateEnvelope {
            config_update: update.encode_to_vec(),
            signatures: Vec::new(),
        }
        .encode_to_vec()
    }
}

/// Generates a hash-chained sequence of blocks `0..count`.
///
/// Block 0 is a CONFIG block; every following block holds one endorser
/// transaction writing `key{n}` in namespace `basic`.
#[must_use]
pub fn generate_chain(channel_id: &str, count: u64) -> Vec<Vec<u8>> {
    let mut blocks = Vec::new();
    let mut previous_hash = Vec::new();

    for number in 0..count {
        let builder = BlockBuilder::new(channel_id, number)
            .previous_hash(previous_hash.clone())
            .timestamp(1_700_000_000 + i64::try_from(number).unwrap_or(i64::MAX));
        let builder = if number == 0 {
            builder.config("genesis", 0, ConfigGroup::default())
        } else {
            builder.endorser(
                EndorserTx::new(format!("tx{number}")).namespace(
                    NsRwSet::new("basic").write(format!("key{number}"), number.to_be_bytes().to_vec()),
                ),
            )
        };
        previous_hash = header_hash(&builder.header());
        blocks.push(builder.build());
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sets_header_and_filter() {
        let builder = BlockBuilder::new("mychannel", 9)
            .previous_hash(vec![1, 2])
            .endorser(EndorserTx::new("a").with_validation_code(11))
            .endorser(EndorserTx::new("b"));
        let data_hash = builder.data_hash();
        let block = Block::decode(builder.build().as_slice()).unwrap();

        let header = block.header.unwrap();
        assert_eq!(header.number, 9);
        assert_eq!(header.previous_hash, vec![1, 2]);
        assert_eq!(header.data_hash, data_hash);
        assert_eq!(block.data.unwrap().data.len(), 2);
        assert_eq!(
            block.metadata.unwrap().metadata[proto::TRANSACTIONS_FILTER_INDEX],
            vec![11, 0]
        );
    }

    #[test]
    fn test_generate_chain_links_hashes() {
        let blocks = generate_chain("mychannel", 3);
        assert_eq!(blocks.len(), 3);

        let headers: Vec<BlockHeader> = blocks
            .iter()
            .map(|raw| Block::decode(raw.as_slice()).unwrap().header.unwrap())
            .collect();
        assert_eq!(headers[1].previous_hash, header_hash(&headers[0]));
        assert_eq!(headers[2].previous_hash, header_hash(&headers[1]));
    }

    #[test]
    fn test_signer_feeds_computed_tx_id() {
        let raw = BlockBuilder::new("mychannel", 1)
            .endorser(
                EndorserTx::new("")
                    .with_signer(b"c".to_vec(), b"n".to_vec())
                    .namespace(NsRwSet::new("ns").write("k", vec![1])),
            )
            .build();
        let txs = crate::core::decoder::BlockDecoder::decode(&raw).unwrap();
        assert_eq!(txs[0].tx_id, hex::encode(Sha256::digest(b"nc")));
    }
}
