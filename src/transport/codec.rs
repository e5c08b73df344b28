use crate::core::errors::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Serialization applied to every payload that crosses a location boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// Compact binary encoding
    #[default]
    Bincode,
    /// Human readable encoding, handy when tracing message contents
    Json,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        let bytes = match self {
            Codec::Bincode => bincode::serialize(value)?,
            Codec::Json => serde_json::to_vec(value)?,
        };
        Ok(Bytes::from(bytes))
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Bincode => Ok(bincode::deserialize(bytes)?),
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Bincode => "bincode",
            Codec::Json => "json",
        }
    }
}
