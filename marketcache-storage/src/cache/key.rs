//! Collection-scoped keys for the durable store.
//!
//! A durable record is addressed by `(collection, key)`. The LMDB backend
//! stores everything in one database, so the pair is flattened into a single
//! byte string whose prefix identifies the collection.

/// Separator byte between collection and key.
///
/// `0xFF` never occurs in well-formed UTF-8, so it cannot collide with either
/// half of the key.
const SEPARATOR: u8 = 0xFF;

/// A durable store key: a collection namespace plus a key unique within it.
///
/// # Binary Format
///
/// `[collection: utf-8 bytes][separator: 0xFF][key: utf-8 bytes]`
///
/// This format ensures:
/// - Encoding is injective (the separator cannot appear inside either part)
/// - All records of one collection share the prefix `collection || 0xFF`,
///   so listing a collection is a single prefix scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey {
    collection: String,
    key: String,
}

impl CollectionKey {
    /// Create a new collection-scoped key.
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// The collection this key lives in.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The key within the collection.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode to bytes for LMDB storage.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.collection.len() + 1 + self.key.len());
        bytes.extend_from_slice(self.collection.as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the separator is missing or either half is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.iter().position(|b| *b == SEPARATOR)?;
        let collection = std::str::from_utf8(&bytes[..split]).ok()?;
        let key = std::str::from_utf8(&bytes[split + 1..]).ok()?;
        Some(Self::new(collection, key))
    }

    /// Prefix shared by every encoded key in `collection`.
    pub fn collection_prefix(collection: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(collection.len() + 1);
        prefix.extend_from_slice(collection.as_bytes());
        prefix.push(SEPARATOR);
        prefix
    }
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let key = CollectionKey::new("prices", "sol");
        assert_eq!(key.encode(), b"prices\xFFsol".to_vec());
    }

    #[test]
    fn test_decode_rejects_missing_separator() {
        assert!(CollectionKey::decode(b"prices-sol").is_none());
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(CollectionKey::decode(&[0xC3, 0xFF, b'a']).is_none());
        assert!(CollectionKey::decode(&[b'a', 0xFF, 0xC3]).is_none());
    }

    #[test]
    fn test_empty_parts_are_allowed() {
        let key = CollectionKey::new("", "");
        assert_eq!(CollectionKey::decode(&key.encode()), Some(key));
    }

    #[test]
    fn test_collection_prefix_does_not_match_longer_collection() {
        let prefix = CollectionKey::collection_prefix("hold");
        let other = CollectionKey::new("holders", "x").encode();
        assert!(!other.starts_with(&prefix));
        let own = CollectionKey::new("hold", "x").encode();
        assert!(own.starts_with(&prefix));
    }

    #[test]
    fn test_display() {
        assert_eq!(CollectionKey::new("trades", "abc_1").to_string(), "trades/abc_1");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: encoding is injective.
        #[test]
        fn prop_encoding_is_injective(
            c1 in ".{0,12}",
            k1 in ".{0,24}",
            c2 in ".{0,12}",
            k2 in ".{0,24}",
        ) {
            let a = CollectionKey::new(c1, k1);
            let b = CollectionKey::new(c2, k2);
            if a == b {
                prop_assert_eq!(a.encode(), b.encode());
            } else {
                prop_assert_ne!(a.encode(), b.encode());
            }
        }

        /// Property: decode inverts encode.
        #[test]
        fn prop_decode_inverts_encode(collection in ".{0,12}", key in ".{0,24}") {
            let original = CollectionKey::new(collection, key);
            prop_assert_eq!(CollectionKey::decode(&original.encode()), Some(original));
        }

        /// Property: every key's encoding starts with its collection prefix.
        #[test]
        fn prop_encoded_key_has_collection_prefix(collection in ".{0,12}", key in ".{0,24}") {
            let encoded = CollectionKey::new(collection.clone(), key).encode();
            prop_assert!(encoded.starts_with(&CollectionKey::collection_prefix(&collection)));
        }
    }
}
