//! # deck-core
//!
//! Core library for a broadcast video deck emulator speaking the
//! line-oriented deck control protocol over TCP.
//!
//! This crate contains:
//! - **Protocol**: `Command` parsing/marshalling and the status-line
//!   vocabulary
//! - **Codec**: `DeckCodec` for framed TCP I/O via `tokio_util`
//! - **Timecode**: frame-accurate SMPTE timecode with drop-frame
//!   display correction
//! - **Engine**: the `MediaEngine` / `DisplaySurface` collaborator
//!   seams plus a wall-clock `SimulatedEngine`
//! - **Slot**: directory-backed clip catalogs with filesystem watching
//! - **Timeline**: the transport state machine sequencing clips
//! - **Deck**: the `Deck` façade and its `MediaDeck` implementation
//! - **Server**: single-client connection manager with watchdog and
//!   write arbitration
//! - **Error**: `DeckError` — typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod deck;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod server;
pub mod slot;
pub mod timecode;
pub mod timeline;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{DeckCodec, MAX_LINE_LENGTH};
pub use deck::{Deck, MediaDeck, NotifyFlags, RemoteFlags, PROTOCOL_VERSION};
pub use engine::{DisplaySurface, EngineEvent, MediaEngine, MediaHandle, SimulatedEngine};
pub use error::DeckError;
pub use protocol::{status, Command};
pub use server::{DeckServer, Pusher};
pub use slot::{DiskClip, FsChange, Slot, SlotStatus};
pub use timecode::{Rate, Timecode, RATE_25, RATE_60_DF};
pub use timeline::{StopMode, TimelineClip, TimelinePlayer};
