//! Core protocol types: hashes, keys, transactions, blocks.
//!
//! Block hashing always runs over the canonical proof-of-work encoding
//! ([`Block::pow_bytes`]), a fixed-layout byte string with the nonce in a
//! known 8-byte window. The wire format is bincode and is independent of
//! the hashing layout.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::MIN_WORK_TARGET;
use crate::error::BlockError;
use crate::pow;

/// A 32-byte hash value: block hashes (double SHA-256) and state
/// commitments (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 32-byte Ed25519 public key. Accounts are keyed directly by public key.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct PubKey(pub [u8; 32]);

impl PubKey {
    /// The all-zero key, reserved for state bookkeeping.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An Ed25519 signature plus the signing public key.
///
/// The public key doubles as the sender account of the enclosing
/// transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxSignature {
    /// Signing (sender) public key.
    pub pub_key: PubKey,
    /// Ed25519 signature bytes (64 bytes).
    pub sig: Vec<u8>,
}

/// A single-input, single-output value transfer.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Amount transferred from sender to recipient.
    pub value: u64,
    /// Receiving public key.
    pub recipient: PubKey,
    /// Signature over `value || recipient || sender`.
    pub signature: TxSignature,
}

impl Transaction {
    /// The byte string a transaction signature commits to.
    fn signing_message(value: u64, recipient: &PubKey, sender: &PubKey) -> Vec<u8> {
        let mut msg = Vec::with_capacity(8 + 32 + 32);
        msg.extend_from_slice(&value.to_le_bytes());
        msg.extend_from_slice(recipient.as_bytes());
        msg.extend_from_slice(sender.as_bytes());
        msg
    }

    /// Build and sign a transfer with the given key.
    pub fn sign(key: &SigningKey, value: u64, recipient: PubKey) -> Self {
        let sender = PubKey(key.verifying_key().to_bytes());
        let msg = Self::signing_message(value, &recipient, &sender);
        let sig = key.sign(&msg);
        Self {
            value,
            recipient,
            signature: TxSignature {
                pub_key: sender,
                sig: sig.to_bytes().to_vec(),
            },
        }
    }

    /// The account debited by this transaction.
    pub fn sender(&self) -> PubKey {
        self.signature.pub_key
    }

    /// Verify the Ed25519 signature.
    pub fn verify(&self) -> Result<(), BlockError> {
        let key = VerifyingKey::from_bytes(self.signature.pub_key.as_bytes())
            .map_err(|_| BlockError::BadSignature)?;
        let sig_bytes: [u8; 64] = self
            .signature
            .sig
            .as_slice()
            .try_into()
            .map_err(|_| BlockError::BadSignature)?;
        let sig = DalekSignature::from_bytes(&sig_bytes);
        let msg = Self::signing_message(self.value, &self.recipient, &self.sender());
        key.verify(&msg, &sig).map_err(|_| BlockError::BadSignature)
    }
}

/// A candidate unit of consensus, immutable once linked into the chain.
///
/// `links` is serialized as a list to leave room for a future multi-parent
/// design, but validation caps it at one entry; ordering code treats the
/// chain as a singly linked list.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Parent hashes: empty for the root, exactly one otherwise.
    pub links: Vec<Hash256>,
    /// Per-block difficulty target. Bigger is harder.
    pub work_target: u64,
    /// Cumulative work of the chain ending at this block.
    pub total_work: u128,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
    /// Public key credited with newly issued coins.
    pub coinbase: PubKey,
    /// Optional single value transfer.
    pub tx: Option<Transaction>,
    /// Commitment to the account state after this block is applied.
    pub state_hash: Hash256,
}

impl Block {
    /// Byte offset of the nonce window within [`pow_bytes`](Self::pow_bytes).
    ///
    /// work_target (8) + total_work (16) + timestamp (8).
    pub const NONCE_OFFSET: usize = 8 + 16 + 8;

    /// Canonical proof-of-work encoding.
    ///
    /// Fixed layout, little-endian integers: work_target, total_work,
    /// timestamp, nonce, coinbase, state_hash, link count, links, tx
    /// marker and fields. The nonce occupies the 8 bytes starting at
    /// [`NONCE_OFFSET`](Self::NONCE_OFFSET), enabling in-place nonce
    /// substitution while mining.
    pub fn pow_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(128 + 32 * self.links.len());
        data.extend_from_slice(&self.work_target.to_le_bytes());
        data.extend_from_slice(&self.total_work.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(self.coinbase.as_bytes());
        data.extend_from_slice(self.state_hash.as_bytes());
        data.push(self.links.len() as u8);
        for link in &self.links {
            data.extend_from_slice(link.as_bytes());
        }
        match &self.tx {
            None => data.push(0),
            Some(tx) => {
                data.push(1);
                data.extend_from_slice(&tx.value.to_le_bytes());
                data.extend_from_slice(tx.recipient.as_bytes());
                data.extend_from_slice(tx.signature.pub_key.as_bytes());
                data.extend_from_slice(&tx.signature.sig);
            }
        }
        data
    }

    /// Block hash: double SHA-256 over the canonical encoding.
    pub fn hash(&self) -> Hash256 {
        hash_pow_bytes(&self.pow_bytes())
    }

    /// Whether the block's hash satisfies its own work target.
    pub fn acceptable_work(&self) -> bool {
        pow::hash_meets_target(&self.hash(), self.work_target)
    }

    /// Coins issued to the coinbase: work target minus the storage fee.
    pub fn coins_generated(&self) -> Result<u64, BlockError> {
        let fee = pow::storage_fee(self.pow_bytes().len());
        self.work_target
            .checked_sub(fee)
            .ok_or(BlockError::NegativeIssuance {
                target: self.work_target,
                fee,
            })
    }

    pub fn is_root(&self) -> bool {
        self.links.is_empty()
    }

    /// Hash of this block's single parent, if any.
    pub fn parent(&self) -> Option<Hash256> {
        self.links.first().copied()
    }

    /// Copy of this block with a different nonce. The only sanctioned
    /// mutation path, used while mining before acceptance.
    pub fn with_nonce(&self, nonce: u64) -> Self {
        let mut block = self.clone();
        block.nonce = nonce;
        block
    }

    /// Structural validation: link count, work-target floor, non-negative
    /// issuance, signature. Proof-of-work and state transitions are
    /// checked by the chain.
    pub fn check(&self) -> Result<(), BlockError> {
        if self.links.len() > 1 {
            return Err(BlockError::TooManyLinks(self.links.len()));
        }
        if self.work_target <= MIN_WORK_TARGET {
            return Err(BlockError::WorkTargetTooLow {
                got: self.work_target,
                min: MIN_WORK_TARGET,
            });
        }
        self.coins_generated()?;
        if let Some(tx) = &self.tx {
            tx.verify()?;
        }
        Ok(())
    }

    /// Encode for the wire (bincode, standard config).
    pub fn encode(&self) -> Result<Vec<u8>, BlockError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| BlockError::Serialization(e.to_string()))
    }

    /// Decode from the wire.
    pub fn decode(data: &[u8]) -> Result<Self, BlockError> {
        let (block, _): (Self, usize) =
            bincode::decode_from_slice(data, bincode::config::standard())
                .map_err(|e| BlockError::Serialization(e.to_string()))?;
        Ok(block)
    }
}

/// Double SHA-256 over a canonical encoding. Shared with the miner's
/// nonce-substitution loop, which hashes mutated copies of the same bytes.
pub fn hash_pow_bytes(bytes: &[u8]) -> Hash256 {
    let first = Sha256::digest(bytes);
    Hash256(Sha256::digest(first).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MIN_WORK_TARGET;

    fn keypair(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn sample_block() -> Block {
        Block {
            links: vec![Hash256([0x11; 32])],
            work_target: MIN_WORK_TARGET * 10,
            total_work: 2 * MIN_WORK_TARGET as u128 * 10,
            timestamp: 1_700_000_000,
            nonce: 0,
            coinbase: PubKey([0xAA; 32]),
            tx: None,
            state_hash: Hash256([0x22; 32]),
        }
    }

    // --- Hash256 / PubKey ---

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
    }

    #[test]
    fn hash256_display_hex() {
        let s = format!("{}", Hash256([0xAB; 32]));
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    // --- Transaction ---

    #[test]
    fn signed_transaction_verifies() {
        let key = keypair(1);
        let tx = Transaction::sign(&key, 42, PubKey([0xBB; 32]));
        assert!(tx.verify().is_ok());
        assert_eq!(tx.sender(), PubKey(key.verifying_key().to_bytes()));
    }

    #[test]
    fn tampered_value_fails_verification() {
        let key = keypair(1);
        let mut tx = Transaction::sign(&key, 42, PubKey([0xBB; 32]));
        tx.value = 43;
        assert_eq!(tx.verify().unwrap_err(), BlockError::BadSignature);
    }

    #[test]
    fn tampered_recipient_fails_verification() {
        let key = keypair(1);
        let mut tx = Transaction::sign(&key, 42, PubKey([0xBB; 32]));
        tx.recipient = PubKey([0xCC; 32]);
        assert!(tx.verify().is_err());
    }

    // --- pow_bytes ---

    #[test]
    fn nonce_sits_at_fixed_offset() {
        let block = sample_block().with_nonce(0x0102030405060708);
        let bytes = block.pow_bytes();
        let window = &bytes[Block::NONCE_OFFSET..Block::NONCE_OFFSET + 8];
        assert_eq!(window, &0x0102030405060708u64.to_le_bytes());
    }

    #[test]
    fn nonce_substitution_matches_full_encoding() {
        let block = sample_block();
        let mut bytes = block.pow_bytes();
        bytes[Block::NONCE_OFFSET..Block::NONCE_OFFSET + 8]
            .copy_from_slice(&777u64.to_le_bytes());
        assert_eq!(bytes, block.with_nonce(777).pow_bytes());
        assert_eq!(hash_pow_bytes(&bytes), block.with_nonce(777).hash());
    }

    #[test]
    fn hash_deterministic_and_nonce_sensitive() {
        let block = sample_block();
        assert_eq!(block.hash(), block.hash());
        assert_ne!(block.hash(), block.with_nonce(1).hash());
    }

    // --- derived properties ---

    #[test]
    fn is_root_on_empty_links() {
        let mut block = sample_block();
        assert!(!block.is_root());
        assert_eq!(block.parent(), Some(Hash256([0x11; 32])));
        block.links.clear();
        assert!(block.is_root());
        assert_eq!(block.parent(), None);
    }

    #[test]
    fn coins_generated_subtracts_storage_fee() {
        let block = sample_block();
        let fee = crate::pow::storage_fee(block.pow_bytes().len());
        assert_eq!(block.coins_generated().unwrap(), block.work_target - fee);
    }

    #[test]
    fn coins_generated_rejects_negative_issuance() {
        let mut block = sample_block();
        block.work_target = 1; // fee exceeds target
        assert!(matches!(
            block.coins_generated().unwrap_err(),
            BlockError::NegativeIssuance { .. }
        ));
    }

    // --- check ---

    #[test]
    fn check_accepts_well_formed_block() {
        assert!(sample_block().check().is_ok());
    }

    #[test]
    fn check_rejects_two_links() {
        let mut block = sample_block();
        block.links.push(Hash256([0x33; 32]));
        assert_eq!(block.check().unwrap_err(), BlockError::TooManyLinks(2));
    }

    #[test]
    fn check_rejects_low_work_target() {
        let mut block = sample_block();
        block.work_target = MIN_WORK_TARGET;
        assert!(matches!(
            block.check().unwrap_err(),
            BlockError::WorkTargetTooLow { .. }
        ));
    }

    #[test]
    fn check_rejects_bad_signature() {
        let key = keypair(1);
        let mut tx = Transaction::sign(&key, 5, PubKey([0xBB; 32]));
        tx.value = 6;
        let mut block = sample_block();
        block.tx = Some(tx);
        assert_eq!(block.check().unwrap_err(), BlockError::BadSignature);
    }

    // --- wire round-trip ---

    #[test]
    fn encode_decode_preserves_hash() {
        let key = keypair(2);
        let mut block = sample_block();
        block.tx = Some(Transaction::sign(&key, 9, PubKey([0xDD; 32])));
        let encoded = block.encode().unwrap();
        let decoded = Block::decode(&encoded).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(Block::decode(&[0xFF, 0x00, 0x13]).is_err());
    }
}
