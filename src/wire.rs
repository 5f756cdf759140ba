use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::error;

use crate::types::Delta;

/// The single object that crosses the wire: a batch of deltas.
///
/// `{"Deltas":[...]}` with the delta fields in declaration order is the
/// compatibility contract with existing peers; field names are
/// case-sensitive. A `null` or absent list decodes as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaBatch {
    #[serde(rename = "Deltas", default, deserialize_with = "null_as_empty")]
    pub deltas: Vec<Delta>,
}

impl DeltaBatch {
    pub fn new(deltas: Vec<Delta>) -> Self {
        Self { deltas }
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Delta>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Delta>>::deserialize(deserializer)?.unwrap_or_default())
}

/// An inbound payload that could not be parsed. The payload is dropped
/// and local state stays untouched.
#[derive(Debug, Error)]
#[error("invalid gossip payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Serialize a batch of deltas for transmission.
///
/// Never fails: a serialization error is logged and degrades to the
/// empty batch, so the transport always has a payload to send.
pub fn encode(deltas: Vec<Delta>) -> Vec<u8> {
    match serde_json::to_vec(&DeltaBatch::new(deltas)) {
        Ok(buf) => buf,
        Err(err) => {
            error!(%err, "failed to encode delta batch");
            b"{\"Deltas\":[]}".to_vec()
        }
    }
}

/// Parse an inbound payload back into its delta list.
pub fn decode(payload: &[u8]) -> Result<Vec<Delta>, DecodeError> {
    let batch: DeltaBatch = serde_json::from_slice(payload)?;
    Ok(batch.deltas)
}
