//! Marshaling of submission payloads for transports that carry points as bytes.

use crate::error::DbError;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait WireCodec {
    fn name(&self) -> &'static str;

    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, DbError>;

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, DbError>;
}

/// Compact binary encoding through `bincode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl WireCodec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, DbError> {
        bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, DbError> {
        bincode::deserialize(data).map_err(|e| DbError::Serialization(e.to_string()))
    }
}
