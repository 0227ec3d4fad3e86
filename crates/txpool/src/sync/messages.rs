//! Framed wire messages for transaction synchronization: a single-byte
//! packet type followed by the payload. Payloads are either an encoded
//! [`TxBatch`] or a bincode hash list.

use shared_types::{CodecError, Hash, TxBatch};

/// Packet kinds carried between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxsSyncPacketType {
    /// Full transactions pushed proactively.
    Txs = 1,
    /// Hash list asking for the corresponding bodies.
    TxsRequest = 2,
    /// Bodies answering a request, in the order the responder found them.
    TxsResponse = 3,
    /// Hash list advertising what the sender holds.
    TxsStatus = 4,
}

impl TxsSyncPacketType {
    fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            1 => Ok(Self::Txs),
            2 => Ok(Self::TxsRequest),
            3 => Ok(Self::TxsResponse),
            4 => Ok(Self::TxsStatus),
            other => Err(CodecError::Decode(format!(
                "unknown sync packet type {other}"
            ))),
        }
    }
}

/// A framed sync message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxsSyncMsg {
    packet_type: TxsSyncPacketType,
    payload: Vec<u8>,
}

impl TxsSyncMsg {
    /// Full-body push carrying a batch.
    pub fn txs_packet(batch: &TxBatch) -> Result<Self, CodecError> {
        Ok(Self {
            packet_type: TxsSyncPacketType::Txs,
            payload: batch.encode()?,
        })
    }

    /// Request for the bodies of `hashes`.
    pub fn request_packet(hashes: &[Hash]) -> Result<Self, CodecError> {
        Ok(Self {
            packet_type: TxsSyncPacketType::TxsRequest,
            payload: encode_hashes(hashes)?,
        })
    }

    /// Response carrying the found bodies.
    pub fn response_packet(batch: &TxBatch) -> Result<Self, CodecError> {
        Ok(Self {
            packet_type: TxsSyncPacketType::TxsResponse,
            payload: batch.encode()?,
        })
    }

    /// Advertisement of hashes available at the sender.
    pub fn status_packet(hashes: &[Hash]) -> Result<Self, CodecError> {
        Ok(Self {
            packet_type: TxsSyncPacketType::TxsStatus,
            payload: encode_hashes(hashes)?,
        })
    }

    pub fn packet_type(&self) -> TxsSyncPacketType {
        self.packet_type
    }

    /// The carried batch; valid for `Txs` and `TxsResponse` packets.
    pub fn batch(&self) -> Result<TxBatch, CodecError> {
        TxBatch::decode(&self.payload)
    }

    /// The carried hash list; valid for `TxsRequest` and `TxsStatus`
    /// packets.
    pub fn hashes(&self) -> Result<Vec<Hash>, CodecError> {
        bincode::deserialize(&self.payload).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// The raw payload, consuming the message.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Frame as bytes: one type byte, then the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut framed = Vec::with_capacity(1 + self.payload.len());
        framed.push(self.packet_type as u8);
        framed.extend_from_slice(&self.payload);
        framed
    }

    /// Split a frame back into type and payload.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (type_byte, payload) = data
            .split_first()
            .ok_or_else(|| CodecError::Decode("empty sync message".to_string()))?;
        Ok(Self {
            packet_type: TxsSyncPacketType::from_byte(*type_byte)?,
            payload: payload.to_vec(),
        })
    }
}

fn encode_hashes(hashes: &[Hash]) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(hashes).map_err(|e| CodecError::Encode(e.to_string()))
}
