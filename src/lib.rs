//! `mmap-bridge` is a lightweight broadcast mailbox for processes on one machine. Participants share a single evolving value through a memory-mapped file and get notified when another participant replaces it.
//!
//! ## Features
//!
//! - **Memory-mapped region**: a fixed-size file holds a lock byte, a registration bitmap and a dirty bitmap of up to 256 participant slots, the payload length and the latest payload. There is no broker process: the file is created by the first participant and removed by the last one leaving.
//!
//! - **Last-writer-wins broadcast**: every write replaces the payload wholesale and flags all other registered participants as having an unread update. Only the latest value is ever observable, nothing is queued.
//!
//! - **Change notification**: each participant runs a listener thread peeking its own dirty flag without locking; consumed updates are decoded and passed to a user-supplied [`Listener`](listener::Listener).
//!
//! - **Validated payloads**: values are stored as [rkyv](https://rkyv.org/) archives and validated before being decoded, so malformed bytes surface as errors rather than undefined behaviour.
//!
//! To get started with `mmap-bridge`, please see the demos provided in the repository.
pub mod bridge;
mod codec;
mod guard;
pub mod layout;
pub mod listener;
pub mod locks;
mod region;
mod registry;

pub use bridge::{Bridge, BridgeError, BridgeOptions};
pub use listener::Listener;
