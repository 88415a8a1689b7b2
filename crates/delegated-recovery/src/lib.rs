//! # delegated-recovery
//!
//! delegated-recovery contains the core of the Delegated Account Recovery
//! protocol: the binary recovery-token codec, ECDSA P-256 signing and
//! multi-key verification, the account-provider and recovery-provider
//! configuration documents with their well-known discovery, and the
//! replay and record bookkeeping an account provider performs around
//! token issuance and recovery.
//!
//! The crate performs no I/O except configuration discovery
//! (`config::client`). Token parsing and validation are pure and
//! in-memory; callers wrap the fetch in whatever concurrency primitive
//! they prefer.
pub mod config;
pub mod errors;
pub mod hash;
pub mod ids;
pub mod key;
pub mod origin;
pub mod packer;
pub mod record;
pub mod replay;
pub mod token;
