//! Integration test suite for the Tally wallet engine.
//!
//! Drives discovery, balance aggregation and delegation end to end against
//! an in-memory store and a scriptable ledger oracle.

pub mod helpers;
