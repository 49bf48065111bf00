//! Low-level helpers shared across Parley crates.
//!
//! Atomic text persistence for state files and instruction overrides, plus
//! character-safe truncation for logs and replies.

pub mod atomic_io;
pub mod text_utils;

pub use atomic_io::write_text_atomic;
pub use text_utils::{char_count, truncate_chars, truncate_with_ellipsis};
