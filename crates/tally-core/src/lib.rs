//! # tally-core
//! Foundation types and collaborator contracts for the Tally wallet engine.
//!
//! - [`multi_token`]: arbitrary-precision multi-asset values
//! - [`era`]: slot / epoch / wall-clock conversion across hard forks
//! - [`address`]: addresses and credentials
//! - [`network`]: network descriptors and protocol parameters
//! - [`traits`]: network, derivation and signing collaborators

pub mod address;
pub mod constants;
pub mod era;
pub mod error;
pub mod multi_token;
pub mod network;
pub mod traits;
pub mod types;
