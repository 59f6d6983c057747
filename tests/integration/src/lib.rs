//! Integration test utilities for the gateway client
//!
//! This crate provides a scripted transport for driving the full connection
//! lifecycle without a network.


pub use helpers::*;
