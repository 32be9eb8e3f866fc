//! Operator state blob
//!
//! Framed with the crate codec: `[magic "STCK"][version][len][crc32][bincode]`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::{decode_frame, encode_frame};
use crate::error::Result;
use crate::sink::{Committable, StoreWriteState};

const STATE_MAGIC: &[u8; 4] = b"STCK";
const STATE_VERSION: u16 = 1;

/// Everything needed to resume a write task after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorState {
    /// Checkpoint the state was taken for
    pub checkpoint_id: u64,
    pub store: StoreWriteState,
    /// Committables emitted but not yet acknowledged, oldest first
    pub outstanding: Vec<Committable>,
}

impl OperatorState {
    pub fn encode(&self) -> Result<Bytes> {
        encode_frame(STATE_MAGIC, STATE_VERSION, self)
    }

    pub fn decode(blob: &[u8]) -> Result<Self> {
        decode_frame(STATE_MAGIC, STATE_VERSION, blob)
    }
}
