//! Account-provider HTTP surface for delegated account recovery.
//!
//! Serves the provider configuration document at its well-known path and
//! receives token-status callbacks from recovery providers.
pub mod handler;
