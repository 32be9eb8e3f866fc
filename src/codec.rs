//! Checksummed framing for persisted blobs
//!
//! Snapshots, checkpoint state and spill runs share one envelope:
//!
//! ```text
//! ┌───────────┬─────────────┬──────────┬──────────┬──────────────────┐
//! │ Magic (4) │ Version (2) │ Len (4)  │ CRC (4)  │ bincode payload  │
//! └───────────┴─────────────┴──────────┴──────────┴──────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StrataError};

/// Magic (4) + Version (2) + Len (4) + CRC (4)
pub const FRAME_HEADER_SIZE: usize = 14;

/// Serialize `value` and wrap it in a checksummed frame
pub fn encode_frame<T: Serialize>(magic: &[u8; 4], version: u16, value: &T) -> Result<Bytes> {
    let payload = bincode::serialize(value)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StrataError::Serialization(format!("payload of {} bytes", payload.len())))?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_slice(magic);
    buf.put_u16_le(version);
    buf.put_u32_le(len);
    buf.put_u32_le(crc32fast::hash(&payload));
    buf.put_slice(&payload);

    Ok(buf.freeze())
}

/// Validate a frame and deserialize its payload
pub fn decode_frame<T: DeserializeOwned>(magic: &[u8; 4], version: u16, bytes: &[u8]) -> Result<T> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(StrataError::Corruption(format!(
            "frame too short: {} bytes",
            bytes.len()
        )));
    }

    let mut header = &bytes[..FRAME_HEADER_SIZE];
    let mut found_magic = [0u8; 4];
    header.copy_to_slice(&mut found_magic);
    if &found_magic != magic {
        return Err(StrataError::Corruption(format!(
            "bad magic: expected {:?}, got {:?}",
            magic, found_magic
        )));
    }

    let found_version = header.get_u16_le();
    if found_version != version {
        return Err(StrataError::Corruption(format!(
            "unsupported frame version {}",
            found_version
        )));
    }

    let len = header.get_u32_le() as usize;
    let crc = header.get_u32_le();

    let payload = &bytes[FRAME_HEADER_SIZE..];
    if payload.len() != len {
        return Err(StrataError::Corruption(format!(
            "truncated frame: expected {} payload bytes, got {}",
            len,
            payload.len()
        )));
    }
    if crc32fast::hash(payload) != crc {
        return Err(StrataError::Corruption("frame CRC mismatch".to_string()));
    }

    Ok(bincode::deserialize(payload)?)
}
