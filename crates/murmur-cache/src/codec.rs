//! Serialization boundary between cached values and stored bytes.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while encoding or decoding a cached value.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{codec} encode failed: {message}")]
    Encode { codec: &'static str, message: String },

    #[error("{codec} decode failed: {message}")]
    Decode { codec: &'static str, message: String },
}

/// Converts values to and from their stored byte form.
pub trait Codec: Send + Sync + 'static {
    /// Codec name for logs.
    fn name(&self) -> &'static str;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec. Stored values stay readable from `redis-cli`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// MessagePack codec for compact storage.
///
/// Structs are written as maps so fields can be added without invalidating
/// entries already in the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: u64,
        body: String,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct PostV2 {
        id: u64,
        body: String,
        #[serde(default)]
        likes: u32,
    }

    #[test]
    fn test_msgpack_tolerates_added_fields() {
        let codec = MsgPackCodec;
        let bytes = codec
            .encode(&Post {
                id: 7,
                body: "hi".into(),
            })
            .unwrap();
        let decoded: PostV2 = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.likes, 0);
    }

    #[test]
    fn test_decode_error_names_codec() {
        let err = JsonCodec.decode::<Post>(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode { codec: "json", .. }));
        assert!(err.to_string().starts_with("json decode failed"));
    }
}
