//! CBOR encoding for protocol messages.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RowKey, Value};

    #[test]
    fn garbage_fails_to_decode() {
        let result: ProtocolResult<RowKey> = decode(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn value_survives_cbor() {
        let value = Value::Bytes(vec![0xCA, 0xFE]);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode::<Value>(&bytes).unwrap(), value);
    }
}
