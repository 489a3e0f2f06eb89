//! # fakedeck
//!
//! The deck emulator binary: configuration plus the wiring of engine,
//! deck, and server. All protocol behavior lives in `deck-core`.

pub mod config;
