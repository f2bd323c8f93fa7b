//! Integration test crate for Waypost.
//!
//! This crate has no library code; it only contains integration tests
//! that drive the action gate, invoice ledger and sponsorship auction
//! together against real SQLite databases.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p waypost-integration-tests
//! ```
