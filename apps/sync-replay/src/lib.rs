//! Offline replay of recorded dashboard socket streams.

pub mod config;
pub mod replay;
