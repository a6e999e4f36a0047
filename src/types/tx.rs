//! The transaction record and its payload.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Separator the ledger uses between the parts of a composite state key.
const COMPOSITE_KEY_SEPARATOR: char = '\u{0}';

/// A single indexed transaction record.
///
/// One ledger transaction yields one `Tx` per namespace that had writes, or
/// a single synthetic `Tx` for a configuration block. The natural key of a
/// record is `(block_number, tx_id, namespace)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub channel_id: String,
    pub tx_id: String,
    /// Namespace (chaincode) whose write-set this record carries. Empty for
    /// configuration records.
    pub namespace: String,
    /// Hex-encoded data hash of the containing block.
    pub block_hash: String,
    /// Hex-encoded hash of the previous block header.
    pub previous_block_hash: String,
    pub block_number: u64,
    pub payload: Payload,
    /// 0 means the ledger validated the transaction.
    pub validation_code: i32,
    /// Unix timestamp (seconds) from the transaction's channel header.
    pub time: i64,
}

impl Tx {
    /// Returns the natural key of the record.
    #[must_use]
    pub fn natural_key(&self) -> (u64, String, String) {
        (self.block_number, self.tx_id.clone(), self.namespace.clone())
    }

    /// Returns `true` if the ledger marked the transaction as valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_code == 0
    }
}

/// One key/value pair of a payload.
///
/// Values are arbitrary bytes and are serialized as base64 so the JSON form
/// is lossless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteKv {
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

impl WriteKv {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered key/value pairs carried by a [`Tx`].
///
/// For state-changing transactions these are the namespace writes in ledger
/// order. For configuration blocks they are synthesized metadata entries
/// (`Type`, `Sequence`, ... or `ChannelId`, `ReadSet`, `WriteSet`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Vec<WriteKv>);

impl Payload {
    #[must_use]
    pub fn new(entries: Vec<WriteKv>) -> Self {
        Self(entries)
    }

    #[must_use]
    pub fn entries(&self) -> &[WriteKv] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value of the first entry with `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_slice())
    }

    /// Keys in payload order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|kv| kv.key.as_str())
    }

    /// Keys in the form used by the payload search index.
    ///
    /// Duplicates are removed while keeping first-seen order.
    #[must_use]
    pub fn index_keys(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.0.len());
        for key in self.keys() {
            let normalized = normalize_index_key(key);
            if !out.contains(&normalized) {
                out.push(normalized);
            }
        }
        out
    }

    /// Returns `true` if any index key contains `needle`.
    #[must_use]
    pub fn matches_key_substring(&self, needle: &str) -> bool {
        self.keys()
            .any(|key| normalize_index_key(key).contains(needle))
    }

    /// Serializes the payload to its JSON storage form.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::SerializationError` if encoding fails.
    pub fn to_json(&self) -> crate::utils::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a payload from its JSON storage form.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::SerializationError` if the JSON is malformed.
    pub fn from_json(raw: &str) -> crate::utils::error::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl FromIterator<WriteKv> for Payload {
    fn from_iter<I: IntoIterator<Item = WriteKv>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Normalizes a state key for the payload search index.
///
/// Composite keys (`\0objectType\0attr1\0attr2\0`) become
/// `objectType:attr1:attr2`. In simple keys only interior NUL characters
/// are replaced, also by `:`, so index keys never contain NUL.
#[must_use]
pub fn normalize_index_key(key: &str) -> String {
    if !key.starts_with(COMPOSITE_KEY_SEPARATOR) {
        return key.replace(COMPOSITE_KEY_SEPARATOR, ":");
    }
    key.split(COMPOSITE_KEY_SEPARATOR)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}

mod base64_bytes {
    use super::{Deserialize, Deserializer, Engine, STANDARD, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Payload {
        Payload::new(vec![
            WriteKv::new("a", vec![1, 2, 3]),
            WriteKv::new("b", vec![0xFF]),
        ])
    }

    #[test]
    fn test_payload_json_is_lossless() {
        let payload = sample_payload();
        let json = payload.to_json().unwrap();
        assert_eq!(json, r#"[{"key":"a","value":"AQID"},{"key":"b","value":"/w=="}]"#);

        let back = Payload::from_json(&json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.get("b"), Some(&[0xFF][..]));
    }

    #[test]
    fn test_payload_rejects_bad_base64() {
        let result = Payload::from_json(r#"[{"key":"a","value":"%%%"}]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_normalize_composite_key() {
        assert_eq!(normalize_index_key("\u{0}car\u{0}CAR1\u{0}"), "car:CAR1");
        assert_eq!(normalize_index_key("plain-key"), "plain-key");
        assert_eq!(normalize_index_key(""), "");
    }

    #[test]
    fn test_normalize_plain_key_with_interior_nul() {
        assert_eq!(normalize_index_key("a\u{0}b"), "a:b");

        let payload = Payload::new(vec![WriteKv::new("a\u{0}b", vec![1])]);
        assert_eq!(payload.index_keys(), vec!["a:b"]);
        assert!(payload.index_keys().iter().all(|k| !k.contains('\u{0}')));
        assert!(payload.matches_key_substring("a:b"));
        assert_eq!(payload.get("a\u{0}b"), Some(&[1u8][..]));
    }

    #[test]
    fn test_index_keys_and_substring_match() {
        let payload = Payload::new(vec![
            WriteKv::new("\u{0}owner\u{0}alice\u{0}", b"1".to_vec()),
            WriteKv::new("asset42", b"2".to_vec()),
            WriteKv::new("asset42", b"3".to_vec()),
        ]);

        assert_eq!(payload.index_keys(), vec!["owner:alice", "asset42"]);
        assert!(payload.matches_key_substring("alice"));
        assert!(payload.matches_key_substring("owner:"));
        assert!(payload.matches_key_substring("set4"));
        assert!(!payload.matches_key_substring("bob"));
    }

    #[test]
    fn test_tx_serde_round_trip() {
        let tx = Tx {
            channel_id: "mychannel".into(),
            tx_id: "abc".into(),
            namespace: "basic".into(),
            block_hash: "00ff".into(),
            previous_block_hash: "ff00".into(),
            block_number: 7,
            payload: sample_payload(),
            validation_code: 0,
            time: 1_700_000_000,
        };

        let json = serde_json::to_string(&tx).unwrap();
        let back: Tx = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
        assert!(back.is_valid());
        assert_eq!(back.natural_key(), (7, "abc".to_string(), "basic".to_string()));
    }
}
