//! Windowlimit - Per-Key Fixed-Window Rate Limiting
//!
//! This crate tracks, for any key, how many hits arrived since the key's
//! window opened and rejects further hits once a threshold is reached.
//! Expired windows are purged lazily on access using a deadline-ordered
//! heap alongside the key index, so no background timer is needed.

pub mod config;
pub mod error;
pub mod ratelimit;
