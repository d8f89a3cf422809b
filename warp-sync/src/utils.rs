use blake2b_simd::Params;

/// Serializes a `BTreeMap` as a sequence of key-value pairs so maps with non-string keys survive
/// self-describing formats such as JSON.
pub mod vec_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize map entries in key order.
    pub fn serialize<S, K, V>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    /// Deserialize map entries from a sequence of pairs.
    pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        let entries: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

/// 32 byte BLAKE2b hash of `parts` with a 16 byte personalisation.
pub(crate) fn blake2b_32(personal: &[u8; 16], parts: &[&[u8]]) -> [u8; 32] {
    let mut state = Params::new().hash_length(32).personal(personal).to_state();
    for part in parts {
        state.update(part);
    }
    let mut output = [0u8; 32];
    output.copy_from_slice(state.finalize().as_bytes());
    output
}
