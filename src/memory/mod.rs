//! Session memory
//!
//! Keeps what was said in a session so it can be shown back to the user

pub mod store;

pub use store::{MessageRole, Transcript, TranscriptMessage, DEFAULT_TRANSCRIPT_CAPACITY};
