//! Error types for the Lode protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("insufficient proof-of-work")] InvalidPoW,
    #[error("block declares {0} parent links, at most 1 allowed")] TooManyLinks(usize),
    #[error("work target {got} not above minimum {min}")] WorkTargetTooLow { got: u64, min: u64 },
    #[error("storage fee {fee} exceeds work target {target}")] NegativeIssuance { target: u64, fee: u64 },
    #[error("total work {got} does not equal parent total work plus target ({expected})")] WrongTotalWork { got: u128, expected: u128 },
    #[error("parentless block is not the canonical root")] UnexpectedRoot,
    #[error("transaction signature invalid")] BadSignature,
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("state hash mismatch: block claims {claimed}, computed {computed}")]
    StateHashMismatch { claimed: String, computed: String },
    #[error("insufficient balance: account has {have}, needs {need}")]
    InsufficientBalance { have: u64, need: u64 },
    #[error("balance overflow crediting {amount}")] BalanceOverflow { amount: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("block not found: {0}")] NotFound(String),
    #[error("root reached unexpectedly while ordering the graph from {early}")]
    InconsistentGraph { early: String },
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] State(#[from] StateError),
    #[error("storage: {0}")] Store(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("message too large: {size} > {max}")] MessageTooLarge { size: usize, max: usize },
    #[error("bad magic bytes")] BadMagic,
    #[error("decode failed: {0}")] Decode(String),
    #[error("locator too large: {size} > {max}")] LocatorTooLarge { size: usize, max: usize },
    #[error("request timed out")] Timeout,
    #[error("peer unavailable: {0}")] PeerUnavailable(String),
}

#[derive(Error, Debug)]
pub enum LodeError {
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] State(#[from] StateError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}
