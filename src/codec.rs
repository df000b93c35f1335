//! Binary encoding for task envelopes and result records
//!
//! Msgpack with `use_bin_type`, so byte strings and text strings round-trip
//! without collapsing into one representation. Struct fields are encoded as
//! a map (not a positional array) so `TaskEnvelope`'s `#[serde(skip_serializing_if
//! = "Option::is_none")]` fields are genuinely absent on the wire, matching
//! the original store's dict-with-missing-keys semantics rather than an
//! explicit nil.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::DsqResult;

/// Dynamic payload value for `args`/`kwargs`/`meta`/results.
///
/// Reused directly from `rmpv` rather than hand-rolled: it already mirrors
/// msgpack's data model (nil, bool, int, float, string, binary, array, map)
/// and round-trips through `serde` losslessly.
pub type Value = rmpv::Value;

/// Encode any serializable value as a msgpack byte string, using map
/// encoding for structs (so optional fields can be omitted) and preserving
/// the binary/text string distinction.
pub fn encode<T: Serialize>(value: &T) -> DsqResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer = rmp_serde::Serializer::new(&mut buf)
        .with_struct_map()
        .with_bytes(rmp_serde::config::BytesMode::ForceAll);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

/// Decode a msgpack byte string produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DsqResult<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        #[serde(skip_serializing_if = "Option::is_none")]
        a: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        b: Option<String>,
        c: Vec<Value>,
        d: HashMap<String, Value>,
    }

    #[test]
    fn round_trips_with_absent_optional_fields() {
        let sample = Sample {
            a: None,
            b: Some("hi".into()),
            c: vec![Value::from(1), Value::from("txt")],
            d: HashMap::new(),
        };
        let bytes = encode(&sample).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(sample, back);
    }

    #[test]
    fn preserves_empty_containers() {
        let sample = Sample {
            a: Some(1),
            b: None,
            c: Vec::new(),
            d: HashMap::new(),
        };
        let bytes = encode(&sample).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert!(back.c.is_empty());
        assert!(back.d.is_empty());
    }

    #[test]
    fn distinguishes_binary_from_text() {
        let bin = Value::Binary(vec![1, 2, 3]);
        let text = Value::String("abc".into());
        let bytes_bin = encode(&bin).unwrap();
        let bytes_text = encode(&text).unwrap();
        let back_bin: Value = decode(&bytes_bin).unwrap();
        let back_text: Value = decode(&bytes_text).unwrap();
        assert!(back_bin.is_bin());
        assert!(back_text.as_str().is_some());
    }
}
