//! # lode-core
//! Foundation types for the Lode protocol: blocks, transactions,
//! proof-of-work math, and the account-balance state.

pub mod constants;
pub mod error;
pub mod genesis;
pub mod pow;
pub mod state;
pub mod types;
