//! Foundational low-level utilities shared across Attune crates.
//!
//! Provides the wall clock abstraction used by the forwarder and the graph
//! projection, plus the atomic file-write helper used by the session record
//! store.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp_ms, Clock, ManualClock, SystemClock};
