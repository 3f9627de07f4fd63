//! Wire message types for the Lode peer protocol.
//!
//! Every message is serialized as a MAGIC_BYTES prefix plus a bincode
//! payload. Size and cardinality limits are enforced both before encoding
//! and after decoding, so a misbehaving peer cannot make us allocate for
//! an oversized locator or block request.

use lode_core::constants::{MAGIC_BYTES, MAX_BLOCK_REQUEST, MAX_LOCATOR_SIZE, MAX_MESSAGE_SIZE};
use lode_core::error::NetworkError;
use lode_core::types::{Block, Hash256};

/// A message exchanged between Lode peers.
///
/// Requests and responses share one enum; the transport pairs them up.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub enum Message {
    /// Ask a peer for its head summary.
    ChainInfoRequest,
    /// Head summary: tip hash and its cumulative work.
    ChainInfo {
        top_block: Hash256,
        total_work: u128,
    },
    /// Ask for a paginated slice of the peer's primary chain past the most
    /// recent locator hash the peer recognizes.
    ChainPrimaryRequest {
        /// Sparse ancestor hashes, newest first.
        block_locator: Vec<Hash256>,
        chunk_size: u64,
        chunk_n: u64,
    },
    /// One primary-chain slice: hashes paired with their cumulative work,
    /// ascending, echoing the pagination parameters.
    ChainPrimary {
        hashes: Vec<Hash256>,
        total_works: Vec<u128>,
        chunk_n: u64,
        chunk_size: u64,
    },
    /// Bulk block fetch by hash.
    BlockRequest { hashes: Vec<Hash256> },
    /// Blocks answering a request; unknown hashes are omitted silently.
    BlockProvide { blocks: Vec<Block> },
    /// Push propagation of a new block.
    BlockAnnounce { block: Block },
    /// Ask for the peer's full linked-block inventory.
    InvRequest,
    /// Inventory of linked block hashes, for reconciliation.
    InvProvide { inv_list: Vec<Hash256> },
}

impl Message {
    /// Validate cardinality limits, before encoding or after decoding.
    pub fn validate(&self) -> Result<(), NetworkError> {
        match self {
            Message::ChainPrimaryRequest { block_locator, .. } => {
                if block_locator.len() > MAX_LOCATOR_SIZE {
                    return Err(NetworkError::LocatorTooLarge {
                        size: block_locator.len(),
                        max: MAX_LOCATOR_SIZE,
                    });
                }
            }
            Message::BlockRequest { hashes } => {
                if hashes.len() > MAX_BLOCK_REQUEST {
                    return Err(NetworkError::Decode(format!(
                        "block request for {} hashes exceeds cap {}",
                        hashes.len(),
                        MAX_BLOCK_REQUEST
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Encode as MAGIC_BYTES + bincode payload.
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        self.validate()?;
        let payload = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| NetworkError::Decode(e.to_string()))?;
        let total = MAGIC_BYTES.len() + payload.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(NetworkError::MessageTooLarge {
                size: total,
                max: MAX_MESSAGE_SIZE,
            });
        }
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&MAGIC_BYTES);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode from MAGIC_BYTES + bincode payload.
    pub fn decode(data: &[u8]) -> Result<Self, NetworkError> {
        // Size check before any deserialization work.
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetworkError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        if data.len() < MAGIC_BYTES.len() || data[..MAGIC_BYTES.len()] != MAGIC_BYTES {
            return Err(NetworkError::BadMagic);
        }
        let payload = &data[MAGIC_BYTES.len()..];
        let (msg, _): (Self, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| NetworkError::Decode(e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::constants::MIN_WORK_TARGET;
    use lode_core::types::PubKey;

    fn sample_block() -> Block {
        Block {
            links: vec![Hash256([0x11; 32])],
            work_target: MIN_WORK_TARGET * 2,
            total_work: 777,
            timestamp: 1_700_000_000,
            nonce: 42,
            coinbase: PubKey([0xAA; 32]),
            tx: None,
            state_hash: Hash256([0x22; 32]),
        }
    }

    #[test]
    fn round_trip_chain_info() {
        let msg = Message::ChainInfo {
            top_block: Hash256([0xBB; 32]),
            total_work: u128::MAX / 3,
        };
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_chain_primary() {
        let msg = Message::ChainPrimary {
            hashes: vec![Hash256([1; 32]), Hash256([2; 32])],
            total_works: vec![100, 200],
            chunk_n: 3,
            chunk_size: 2,
        };
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_block_announce() {
        let msg = Message::BlockAnnounce {
            block: sample_block(),
        };
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        match decoded {
            Message::BlockAnnounce { block } => assert_eq!(block.hash(), sample_block().hash()),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn encoded_starts_with_magic() {
        let encoded = Message::InvRequest.encode().unwrap();
        assert_eq!(&encoded[..4], b"LODE");
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut encoded = Message::ChainInfoRequest.encode().unwrap();
        encoded[0] = 0x00;
        assert_eq!(
            Message::decode(&encoded).unwrap_err(),
            NetworkError::BadMagic
        );
    }

    #[test]
    fn short_and_empty_rejected() {
        assert!(Message::decode(&[]).is_err());
        assert!(Message::decode(&[0x4C, 0x4F]).is_err());
    }

    #[test]
    fn garbage_payload_rejected() {
        let mut data = MAGIC_BYTES.to_vec();
        data.extend_from_slice(&[0xFF; 8]);
        assert!(matches!(
            Message::decode(&data).unwrap_err(),
            NetworkError::Decode(_)
        ));
    }

    #[test]
    fn oversized_locator_rejected_on_encode() {
        let msg = Message::ChainPrimaryRequest {
            block_locator: vec![Hash256::ZERO; MAX_LOCATOR_SIZE + 1],
            chunk_size: 10,
            chunk_n: 0,
        };
        assert!(matches!(
            msg.encode().unwrap_err(),
            NetworkError::LocatorTooLarge { .. }
        ));
    }

    #[test]
    fn oversized_block_request_rejected_on_decode() {
        // Hand-build the payload, bypassing encode()'s validation.
        let msg = Message::BlockRequest {
            hashes: vec![Hash256::ZERO; MAX_BLOCK_REQUEST + 1],
        };
        let payload = bincode::encode_to_vec(&msg, bincode::config::standard()).unwrap();
        let mut data = MAGIC_BYTES.to_vec();
        data.extend_from_slice(&payload);
        assert!(Message::decode(&data).is_err());
    }
}
