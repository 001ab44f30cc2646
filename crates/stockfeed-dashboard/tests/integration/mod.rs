//! Integration tests for stockfeed-dashboard.
//!
//! These tests run the real hub session against a mock hub:
//! - Handshake and group joins
//! - Price pushes reaching the presenter
//! - Reconnection and subscription replay

pub mod common;
