//! warden-store — SQLite persistence for the warden face gallery.
//!
//! Two tables: `known_faces` (identities with metadata) and `unknown_faces`
//! (one row per unknown cluster). Both carry the face embedding as a blob
//! of little-endian `f32` values.

pub mod codec;
pub mod sqlite;

pub use sqlite::{SqliteError, SqliteStore};
