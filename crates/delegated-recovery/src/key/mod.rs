//! APIs for cryptographic operations on recovery tokens.
//!
//! The protocol mandates ECDSA over P-256 (secp256r1, also known as
//! prime256v1) with SHA-256.
pub mod p256;
